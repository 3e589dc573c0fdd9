use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    JobAgent,
    JobBoard,
    ResignationAgency,
    CareerCoaching,
    MentalHealth,
    SkillUp,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::JobAgent => "job_agent",
            ServiceCategory::JobBoard => "job_board",
            ServiceCategory::ResignationAgency => "resignation_agency",
            ServiceCategory::CareerCoaching => "career_coaching",
            ServiceCategory::MentalHealth => "mental_health",
            ServiceCategory::SkillUp => "skill_up",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub category: ServiceCategory,
    /// Tags the model may name in `service_tags`.
    pub tags: &'static [&'static str],
    /// Answer terms that make this service more relevant.
    #[serde(skip)]
    pub keywords: &'static [&'static str],
}

pub fn all() -> &'static [ServiceEntry] {
    CATALOG
}

pub fn find(id: &str) -> Option<&'static ServiceEntry> {
    CATALOG.iter().find(|s| s.id == id)
}

const CATALOG: &[ServiceEntry] = &[
    ServiceEntry {
        id: "agent-general",
        name: "総合型転職エージェント",
        url: "https://example.com/go/agent-general",
        category: ServiceCategory::JobAgent,
        tags: &["agent", "job_change", "salary"],
        keywords: &["転職", "年収", "求人", "エージェント"],
    },
    ServiceEntry {
        id: "agent-it",
        name: "IT・Web特化型エージェント",
        url: "https://example.com/go/agent-it",
        category: ServiceCategory::JobAgent,
        tags: &["agent", "it", "engineer"],
        keywords: &["エンジニア", "プログラマ", "it業界", "web系"],
    },
    ServiceEntry {
        id: "board-major",
        name: "大手転職サイト",
        url: "https://example.com/go/board-major",
        category: ServiceCategory::JobBoard,
        tags: &["job_board", "job_change"],
        keywords: &["求人", "他社", "次の仕事"],
    },
    ServiceEntry {
        id: "resign-proxy",
        name: "退職代行サービス",
        url: "https://example.com/go/resign-proxy",
        category: ServiceCategory::ResignationAgency,
        tags: &["resignation", "urgent"],
        keywords: &["辞めたい", "退職", "言い出せない", "限界"],
    },
    ServiceEntry {
        id: "coach-career",
        name: "キャリアコーチング",
        url: "https://example.com/go/coach-career",
        category: ServiceCategory::CareerCoaching,
        tags: &["coaching", "career_plan"],
        keywords: &["やりたいこと", "キャリア", "迷", "わからない"],
    },
    ServiceEntry {
        id: "counsel-online",
        name: "オンラインカウンセリング",
        url: "https://example.com/go/counsel-online",
        category: ServiceCategory::MentalHealth,
        tags: &["mental", "counseling"],
        keywords: &["眠れ", "体調", "うつ", "ストレス", "つらい"],
    },
    ServiceEntry {
        id: "school-programming",
        name: "オンラインプログラミングスクール",
        url: "https://example.com/go/school-programming",
        category: ServiceCategory::SkillUp,
        tags: &["skill", "it", "learning"],
        keywords: &["スキル", "学び", "資格", "プログラミング"],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<&str> = all().iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn find_by_id() {
        assert_eq!(
            find("resign-proxy").map(|s| s.category),
            Some(ServiceCategory::ResignationAgency)
        );
        assert!(find("missing").is_none());
    }

    #[test]
    fn keywords_are_lowercase() {
        // matched against a lowercased answer blob
        for s in all() {
            for k in s.keywords {
                assert_eq!(*k, k.to_lowercase(), "{} keyword {k}", s.id);
            }
        }
    }

    #[test]
    fn ascii_keywords_are_not_bare_short_words() {
        // substring matching: "it" would hit "with", "quite"
        for s in all() {
            for k in s.keywords.iter().filter(|k| k.is_ascii()) {
                assert!(k.len() >= 4, "{} keyword {k:?} is too short", s.id);
            }
        }
    }
}
