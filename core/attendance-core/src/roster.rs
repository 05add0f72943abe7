//! Who can be marked present, and which batches they belong to.

use classeye_daemon_protocol::Student;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{AttendanceError, Result};

/// Read-only view of registered students used by the engine and the
/// reconstructor.
pub trait Roster {
    fn name_of(&self, student_id: &str) -> Option<String>;

    /// Batch tags, uppercased. `None` means the student is not registered.
    fn batches_of(&self, student_id: &str) -> Option<BTreeSet<String>>;

    /// All registered ids in ascending order.
    fn student_ids(&self) -> Vec<String>;

    fn contains(&self, student_id: &str) -> bool {
        self.name_of(student_id).is_some()
    }
}

/// Active batch selection. Comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFilter {
    All,
    Only(String),
}

impl BatchFilter {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            BatchFilter::All
        } else {
            BatchFilter::Only(value.to_uppercase())
        }
    }

    pub fn admits(&self, batches: &BTreeSet<String>) -> bool {
        match self {
            BatchFilter::All => true,
            BatchFilter::Only(batch) => batches.contains(batch),
        }
    }
}

impl Default for BatchFilter {
    fn default() -> Self {
        BatchFilter::All
    }
}

impl fmt::Display for BatchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFilter::All => write!(f, "ALL"),
            BatchFilter::Only(batch) => write!(f, "{}", batch),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRoster {
    students: BTreeMap<String, Student>,
}

impl InMemoryRoster {
    pub fn new(students: impl IntoIterator<Item = Student>) -> Self {
        Self {
            students: students
                .into_iter()
                .map(|student| (student.student_id.clone(), student))
                .collect(),
        }
    }

    pub fn insert(&mut self, student: Student) -> Result<()> {
        if self.students.contains_key(&student.student_id) {
            return Err(AttendanceError::StudentAlreadyRegistered(
                student.student_id,
            ));
        }
        self.students.insert(student.student_id.clone(), student);
        Ok(())
    }

    pub fn remove(&mut self, student_id: &str) -> Result<Student> {
        self.students
            .remove(student_id)
            .ok_or_else(|| AttendanceError::StudentNotFound(student_id.to_string()))
    }

    pub fn get(&self, student_id: &str) -> Option<&Student> {
        self.students.get(student_id)
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.students.values()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Every distinct batch across the roster, uppercased and sorted.
    pub fn batches(&self) -> Vec<String> {
        self.students
            .values()
            .flat_map(Student::batch_keys)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Roster for InMemoryRoster {
    fn name_of(&self, student_id: &str) -> Option<String> {
        self.students.get(student_id).map(|s| s.name.clone())
    }

    fn batches_of(&self, student_id: &str) -> Option<BTreeSet<String>> {
        self.students.get(student_id).map(Student::batch_keys)
    }

    fn student_ids(&self) -> Vec<String> {
        self.students.keys().cloned().collect()
    }
}
