//! The fixed course and time-slot lists a booking picks from.

use serde::{Deserialize, Serialize};

/// A selectable course or time slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable id, also used as the button payload.
    pub id: String,
    /// Display title.
    pub title: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Courses and time slots offered for trial lessons.
#[derive(Debug, Clone)]
pub struct Catalog {
    courses: Vec<CatalogEntry>,
    slots: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(courses: Vec<CatalogEntry>, slots: Vec<CatalogEntry>) -> Self {
        Self { courses, slots }
    }

    /// The school's standard offering.
    pub fn school_default() -> Self {
        let courses = [
            ("book_a1a2", "General English A1-A2 (Beginner)"),
            ("book_b1b2", "General English B1-B2 (Intermediate)"),
            ("book_conversational", "Conversational English"),
            ("book_speaking", "Speaking Booster"),
            ("book_business", "Business English"),
            ("book_exam", "IELTS/TOEFL Preparation"),
            ("book_it", "IT English"),
            ("book_relocation", "English for Relocation"),
        ];
        let slots = [
            ("slot_mon_1800", "Mon 18:00"),
            ("slot_tue_0800", "Tue 08:00"),
            ("slot_wed_1300", "Wed 13:00"),
            ("slot_thu_1900", "Thu 19:00"),
            ("slot_fri_2030", "Fri 20:30"),
            ("slot_sat_1100", "Sat 11:00"),
        ];
        Self::new(
            courses
                .iter()
                .map(|(id, title)| CatalogEntry::new(*id, *title))
                .collect(),
            slots
                .iter()
                .map(|(id, title)| CatalogEntry::new(*id, *title))
                .collect(),
        )
    }

    pub fn courses(&self) -> &[CatalogEntry] {
        &self.courses
    }

    pub fn slots(&self) -> &[CatalogEntry] {
        &self.slots
    }

    pub fn find_course(&self, input: &str) -> Option<&CatalogEntry> {
        find_entry(&self.courses, input)
    }

    pub fn find_slot(&self, input: &str) -> Option<&CatalogEntry> {
        find_entry(&self.slots, input)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::school_default()
    }
}

/// Match by id, by 1-based position, or by title ignoring case and extra whitespace.
fn find_entry<'a>(entries: &'a [CatalogEntry], input: &str) -> Option<&'a CatalogEntry> {
    let needle = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if needle.is_empty() {
        return None;
    }

    if let Some(entry) = entries.iter().find(|e| e.id == needle) {
        return Some(entry);
    }

    if let Ok(position) = needle.parse::<usize>() {
        return position.checked_sub(1).and_then(|i| entries.get(i));
    }

    let needle = needle.to_lowercase();
    entries.iter().find(|e| e.title.to_lowercase() == needle)
}
