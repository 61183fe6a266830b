//! Resource documents other than timetables.

use crate::schedule::{DayOfWeek, TimeOfDay};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn require(errors: &mut Vec<String>, value: &str, field: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{} is required", field));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Board {
    #[default]
    #[serde(rename = "CBSE")]
    Cbse,
    #[serde(rename = "ICSE")]
    Icse,
    #[serde(rename = "State Board")]
    StateBoard,
}

impl Board {
    pub fn as_str(self) -> &'static str {
        match self {
            Board::Cbse => "CBSE",
            Board::Icse => "ICSE",
            Board::StateBoard => "State Board",
        }
    }

    /// Query filters arrive in any case ("cbse", "state board").
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [Board::Cbse, Board::Icse, Board::StateBoard]
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherDoc {
    pub name: String,
    pub email: String,
    pub department: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub experience: u32,
    #[serde(default)]
    pub qualifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl TeacherDoc {
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_ascii_lowercase();
        self.department = self.department.trim().to_string();
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, &self.name, "name");
        require(&mut errors, &self.email, "email");
        require(&mut errors, &self.department, "department");
        if !self.email.is_empty() && !self.email.contains('@') {
            errors.push("email must be an email address".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub admission_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDoc {
    pub class_name: String,
    pub section: String,
    #[serde(default)]
    pub board: Board,
    pub academic_year: String,
    pub class_teacher: String,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl ClassDoc {
    /// Trims fields and assigns ids to students that arrived without one.
    pub fn normalize(&mut self) {
        self.class_name = self.class_name.trim().to_string();
        self.section = self.section.trim().to_string();
        self.academic_year = self.academic_year.trim().to_string();
        for s in &mut self.students {
            s.name = s.name.trim().to_string();
            s.roll_number = s.roll_number.trim().to_string();
            if s.id.trim().is_empty() {
                s.id = uuid::Uuid::new_v4().to_string();
            }
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, &self.class_name, "className");
        require(&mut errors, &self.section, "section");
        require(&mut errors, &self.academic_year, "academicYear");
        require(&mut errors, &self.class_teacher, "classTeacher");
        let mut seen = std::collections::HashSet::new();
        for s in &self.students {
            require(&mut errors, &s.name, "students.name");
            require(&mut errors, &s.roll_number, "students.rollNumber");
            require(&mut errors, &s.admission_number, "students.admissionNumber");
            if !s.roll_number.is_empty() && !seen.insert(s.roll_number.as_str()) {
                errors.push(format!("duplicate rollNumber {}", s.roll_number));
            }
        }
        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubjectCategory {
    #[default]
    Core,
    Language,
    Elective,
    Activity,
    Skill,
}

impl SubjectCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectCategory::Core => "Core",
            SubjectCategory::Language => "Language",
            SubjectCategory::Elective => "Elective",
            SubjectCategory::Activity => "Activity",
            SubjectCategory::Skill => "Skill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [
            SubjectCategory::Core,
            SubjectCategory::Language,
            SubjectCategory::Elective,
            SubjectCategory::Activity,
            SubjectCategory::Skill,
        ]
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }
}

fn default_periods_per_week() -> u32 {
    5
}

fn default_duration() -> u32 {
    40
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectClass {
    pub class_name: String,
    #[serde(default = "default_true")]
    pub is_compulsory: bool,
    #[serde(default = "default_periods_per_week")]
    pub periods_per_week: u32,
    #[serde(default = "default_duration")]
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDoc {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub board: Board,
    #[serde(default)]
    pub classes: Vec<SubjectClass>,
    #[serde(default)]
    pub category: SubjectCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl SubjectDoc {
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.code = self.code.trim().to_ascii_uppercase();
        self.description = self
            .description
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        for c in &mut self.classes {
            c.class_name = c.class_name.trim().to_string();
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, &self.name, "name");
        require(&mut errors, &self.code, "code");
        let mut seen = std::collections::HashSet::new();
        for c in &self.classes {
            require(&mut errors, &c.class_name, "classes.className");
            if !c.class_name.is_empty() && !seen.insert(c.class_name.as_str()) {
                errors.push(format!("duplicate class {}", c.class_name));
            }
        }
        errors
    }

    pub fn offers(&self, class_name: &str) -> Option<&SubjectClass> {
        self.classes.iter().find(|c| c.class_name == class_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Term {
    #[serde(rename = "Term 1")]
    Term1,
    #[serde(rename = "Term 2")]
    Term2,
    #[default]
    Annual,
}

impl Term {
    pub fn as_str(self) -> &'static str {
        match self {
            Term::Term1 => "Term 1",
            Term::Term2 => "Term 2",
            Term::Annual => "Annual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssessmentType {
    #[serde(rename = "FA1")]
    Fa1,
    #[serde(rename = "FA2")]
    Fa2,
    #[default]
    #[serde(rename = "SA1")]
    Sa1,
    #[serde(rename = "SA2")]
    Sa2,
    Project,
    Practical,
}

/// Academic months, April first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Month {
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
    January,
    February,
    March,
}

impl Month {
    pub fn as_str(self) -> &'static str {
        match self {
            Month::April => "April",
            Month::May => "May",
            Month::June => "June",
            Month::July => "July",
            Month::August => "August",
            Month::September => "September",
            Month::October => "October",
            Month::November => "November",
            Month::December => "December",
            Month::January => "January",
            Month::February => "February",
            Month::March => "March",
        }
    }
}

fn default_estimated_hours() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub chapter_number: u32,
    pub chapter_name: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub learning_outcomes: Vec<String>,
    #[serde(default = "default_estimated_hours")]
    pub estimated_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<Month>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    #[serde(default)]
    pub id: String,
    pub unit_number: u32,
    pub unit_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub total_hours: f64,
    #[serde(default)]
    pub weightage: f64,
    #[serde(default)]
    pub assessment_type: AssessmentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticalWork {
    pub experiment_name: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<Month>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Textbook {
    pub title: String,
    pub author: String,
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default)]
    pub is_main: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceBook {
    pub title: String,
    pub author: String,
    pub publisher: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationScheme {
    pub internal_assessment: f64,
    pub terminal_exam: f64,
    pub practical_exam: f64,
}

impl Default for EvaluationScheme {
    fn default() -> Self {
        Self {
            internal_assessment: 20.0,
            terminal_exam: 80.0,
            practical_exam: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusDoc {
    pub subject: String,
    pub class_name: String,
    #[serde(default)]
    pub board: Board,
    pub academic_year: String,
    #[serde(default)]
    pub term: Term,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub practical_work: Vec<PracticalWork>,
    #[serde(default)]
    pub textbooks: Vec<Textbook>,
    #[serde(default)]
    pub reference_books: Vec<ReferenceBook>,
    #[serde(default)]
    pub evaluation_scheme: EvaluationScheme,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl SyllabusDoc {
    pub fn normalize(&mut self) {
        self.class_name = self.class_name.trim().to_string();
        self.academic_year = self.academic_year.trim().to_string();
        for u in &mut self.units {
            if u.id.trim().is_empty() {
                u.id = uuid::Uuid::new_v4().to_string();
            }
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, &self.subject, "subject");
        require(&mut errors, &self.class_name, "className");
        require(&mut errors, &self.academic_year, "academicYear");
        let mut seen = std::collections::HashSet::new();
        for u in &self.units {
            require(&mut errors, &u.unit_name, "units.unitName");
            if !seen.insert(u.unit_number) {
                errors.push(format!("duplicate unitNumber {}", u.unit_number));
            }
            for c in &u.chapters {
                require(&mut errors, &c.chapter_name, "units.chapters.chapterName");
            }
        }
        for p in &self.practical_work {
            require(&mut errors, &p.experiment_name, "practicalWork.experimentName");
        }
        for t in &self.textbooks {
            require(&mut errors, &t.title, "textbooks.title");
            require(&mut errors, &t.author, "textbooks.author");
            require(&mut errors, &t.publisher, "textbooks.publisher");
        }
        for r in &self.reference_books {
            require(&mut errors, &r.title, "referenceBooks.title");
            require(&mut errors, &r.author, "referenceBooks.author");
            require(&mut errors, &r.publisher, "referenceBooks.publisher");
        }
        errors
    }

    pub fn total_chapters(&self) -> usize {
        self.units.iter().map(|u| u.chapters.len()).sum()
    }

    pub fn total_hours(&self) -> f64 {
        self.units.iter().map(|u| u.total_hours).sum()
    }
}

fn default_lecture_type() -> String {
    "Lecture".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LectureDoc {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<String>,
    pub classroom: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub day_of_week: DayOfWeek,
    #[serde(default = "default_lecture_type")]
    pub lecture_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl LectureDoc {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, &self.subject, "subject");
        require(&mut errors, &self.classroom, "classroom");
        if self.end_time < self.start_time {
            errors.push("endTime must not be before startTime".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn board_filter_is_case_insensitive() {
        assert_eq!(Board::parse("cbse"), Some(Board::Cbse));
        assert_eq!(Board::parse("state board"), Some(Board::StateBoard));
        assert_eq!(Board::parse("IB"), None);
    }

    #[test]
    fn subject_defaults_and_code_normalization() {
        let mut doc: SubjectDoc = serde_json::from_value(json!({
            "name": " Mathematics ",
            "code": " math ",
            "classes": [{ "className": "Class 10" }]
        }))
        .expect("subject doc");
        doc.normalize();
        assert_eq!(doc.code, "MATH");
        assert_eq!(doc.board, Board::Cbse);
        assert_eq!(doc.category, SubjectCategory::Core);
        assert_eq!(doc.classes[0].periods_per_week, 5);
        assert_eq!(doc.classes[0].duration, 40);
        assert!(doc.validate().is_empty());
    }

    #[test]
    fn class_rejects_duplicate_roll_numbers() {
        let mut doc: ClassDoc = serde_json::from_value(json!({
            "className": "Class 5",
            "section": "A",
            "academicYear": "2024-25",
            "classTeacher": "t1",
            "students": [
                { "name": "A", "rollNumber": "1", "admissionNumber": "100" },
                { "name": "B", "rollNumber": "1", "admissionNumber": "101" }
            ]
        }))
        .expect("class doc");
        doc.normalize();
        assert!(doc.students.iter().all(|s| !s.id.is_empty()));
        let errors = doc.validate();
        assert_eq!(errors, vec!["duplicate rollNumber 1".to_string()]);
    }

    #[test]
    fn syllabus_term_and_evaluation_defaults() {
        let doc: SyllabusDoc = serde_json::from_value(json!({
            "subject": "s1",
            "className": "Class 9",
            "academicYear": "2024-25",
            "evaluationScheme": { "practicalExam": 10 }
        }))
        .expect("syllabus doc");
        assert_eq!(doc.term, Term::Annual);
        assert_eq!(doc.evaluation_scheme.internal_assessment, 20.0);
        assert_eq!(doc.evaluation_scheme.practical_exam, 10.0);
    }
}
