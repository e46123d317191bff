//! School knowledge base and topic classification.
//!
//! The knowledge base is a directory of plain-text files, one per section
//! (courses, pricing, ...). Incoming questions are mapped to a [`Topic`] by
//! keyword rules; the topic decides which sections go into the prompt and
//! doubles as the answer-cache tag.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::KnowledgeError;

/// One knowledge file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Company,
    Courses,
    Teachers,
    Testimonials,
    Pricing,
    Faq,
    Policies,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Company,
        Section::Courses,
        Section::Teachers,
        Section::Testimonials,
        Section::Pricing,
        Section::Faq,
        Section::Policies,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Company => "company.txt",
            Self::Courses => "courses.txt",
            Self::Teachers => "teachers.txt",
            Self::Testimonials => "testimonials.txt",
            Self::Pricing => "pricing.txt",
            Self::Faq => "faq.txt",
            Self::Policies => "policies.txt",
        }
    }
}

/// What a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    General,
    Courses,
    Prices,
    Teachers,
    Reviews,
    Schedule,
    Policies,
    Faq,
    Contact,
}

impl Topic {
    /// Sections fed to the model for this topic.
    pub fn sections(&self) -> &'static [Section] {
        use Section::*;
        match self {
            Topic::General => &Section::ALL,
            Topic::Courses => &[Courses, Pricing],
            Topic::Prices => &[Pricing, Courses, Policies],
            Topic::Teachers => &[Teachers],
            Topic::Reviews => &[Testimonials],
            Topic::Schedule => &[Courses, Faq],
            Topic::Policies => &[Policies, Faq],
            Topic::Faq => &[Faq],
            Topic::Contact => &[Company],
        }
    }

    /// Cache tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::Courses => "courses",
            Topic::Prices => "prices",
            Topic::Teachers => "teachers",
            Topic::Reviews => "reviews",
            Topic::Schedule => "schedule",
            Topic::Policies => "policies",
            Topic::Faq => "faq",
            Topic::Contact => "contact",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyword rule mapping matching text to a topic.
struct TopicRule {
    regex: Regex,
    topic: Topic,
}

/// Checked in order; the first match wins.
static TOPIC_RULES: LazyLock<Vec<TopicRule>> = LazyLock::new(|| {
    let rule = |pattern: &str, topic| TopicRule {
        regex: Regex::new(pattern).expect("valid topic regex"),
        topic,
    };
    vec![
        rule(
            r"(?i)\b(prices?|cost|costs|how much|fees?|payment|pay|discounts?|tariffs?)\b|цен|стоим|сколько стоит|оплат|скидк",
            Topic::Prices,
        ),
        rule(
            r"(?i)\b(refunds?|cancellation|cancel|policy|policies|reschedul\w*|freeze)\b|возврат|отмен|правил|заморо",
            Topic::Policies,
        ),
        rule(
            r"(?i)\b(teachers?|tutors?|instructors?|native speakers?)\b|преподав|учител",
            Topic::Teachers,
        ),
        rule(
            r"(?i)\b(reviews?|testimonials?|feedback)\b|отзыв",
            Topic::Reviews,
        ),
        rule(
            r"(?i)\b(schedule|timetable|when|hours|weekends?|evenings?|mornings?)\b|расписан|когда|время",
            Topic::Schedule,
        ),
        rule(
            r"(?i)\b(courses?|programs?|programmes?|levels?|ielts|toefl|business english|speaking)\b|курс|программ|уровен",
            Topic::Courses,
        ),
        rule(
            r"(?i)\b(contacts?|phone|email|address|support)\b|контакт|телефон|адрес|поддержк",
            Topic::Contact,
        ),
    ]
});

/// Map free text to a topic. Unmatched text is `General`.
pub fn classify_topic(text: &str) -> Topic {
    let topic = TOPIC_RULES
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .map(|rule| rule.topic)
        .unwrap_or(Topic::General);
    debug!(%topic, "Classified question");
    topic
}

/// Source of knowledge snippets for prompts and info commands.
pub trait KnowledgeBase: Send + Sync {
    /// Snippets relevant to `topic`, in a stable order. May be empty.
    fn context_for(&self, topic: Topic) -> Vec<String>;
}

/// Knowledge held in memory, loaded once from a directory of text files.
#[derive(Debug, Clone, Default)]
pub struct FileKnowledgeBase {
    sections: HashMap<Section, String>,
}

impl FileKnowledgeBase {
    /// Load every known section file present in `dir`. Missing or empty files
    /// are skipped with a warning; a missing directory is an error.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let dir = dir.as_ref();
        if !tokio::fs::try_exists(dir).await? {
            return Err(KnowledgeError::DirectoryNotFound(dir.display().to_string()));
        }

        let mut sections = HashMap::new();
        for section in Section::ALL {
            let path = dir.join(section.file_name());
            match tokio::fs::read_to_string(&path).await {
                Ok(content) if !content.trim().is_empty() => {
                    sections.insert(section, content.trim().to_string());
                }
                Ok(_) => warn!(file = %path.display(), "Knowledge file is empty"),
                Err(e) => warn!(file = %path.display(), error = %e, "Knowledge file not loaded"),
            }
        }

        info!(dir = %dir.display(), sections = sections.len(), "Knowledge base loaded");
        Ok(Self { sections })
    }

    /// Build from in-memory sections.
    pub fn from_sections(sections: impl IntoIterator<Item = (Section, String)>) -> Self {
        Self {
            sections: sections.into_iter().collect(),
        }
    }

    pub fn section(&self, section: Section) -> Option<&str> {
        self.sections.get(&section).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl KnowledgeBase for FileKnowledgeBase {
    fn context_for(&self, topic: Topic) -> Vec<String> {
        topic
            .sections()
            .iter()
            .filter_map(|s| self.sections.get(s).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_keywords() {
        let cases = [
            ("What are your prices?", Topic::Prices),
            ("How much is the IELTS course?", Topic::Prices),
            ("Сколько стоит занятие?", Topic::Prices),
            ("Can I get a refund?", Topic::Policies),
            ("Who are your teachers?", Topic::Teachers),
            ("Any reviews from students?", Topic::Reviews),
            ("When are evening classes?", Topic::Schedule),
            ("Do you have Business English?", Topic::Courses),
            ("What's your support email?", Topic::Contact),
            ("Hello there", Topic::General),
        ];
        for (text, expected) in cases {
            assert_eq!(classify_topic(text), expected, "{text:?}");
        }
    }

    #[test]
    fn general_topic_uses_every_section() {
        let kb = FileKnowledgeBase::from_sections(
            Section::ALL.map(|s| (s, format!("{} content", s.file_name()))),
        );
        assert_eq!(kb.context_for(Topic::General).len(), 7);
        assert_eq!(
            kb.context_for(Topic::Reviews),
            vec!["testimonials.txt content".to_string()]
        );
    }

    #[test]
    fn missing_sections_are_skipped() {
        let kb = FileKnowledgeBase::from_sections([(Section::Pricing, "900 RUB".to_string())]);
        assert_eq!(kb.context_for(Topic::Prices), vec!["900 RUB".to_string()]);
        assert!(kb.context_for(Topic::Teachers).is_empty());
    }

    #[tokio::test]
    async fn load_reads_known_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pricing.txt"), "  Group lesson: 900 RUB\n").unwrap();
        std::fs::write(dir.path().join("faq.txt"), "   ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let kb = FileKnowledgeBase::load(dir.path()).await.unwrap();
        assert_eq!(kb.section(Section::Pricing), Some("Group lesson: 900 RUB"));
        assert_eq!(kb.section(Section::Faq), None);
        assert_eq!(kb.context_for(Topic::General).len(), 1);
    }

    #[tokio::test]
    async fn load_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            FileKnowledgeBase::load(&missing).await,
            Err(KnowledgeError::DirectoryNotFound(_))
        ));
    }
}
