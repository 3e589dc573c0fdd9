use crate::catalog::{self, ServiceCategory, ServiceEntry};
use crate::model::{Classification, Priority, ServiceRecommendation};

const AI_TAG_WEIGHT: u32 = 2;
const KEYWORD_WEIGHT: u32 = 1;

/// Base relevance of each service category for a classification.
pub fn affinity(classification: Classification, category: ServiceCategory) -> u32 {
    use ServiceCategory::*;
    match classification {
        Classification::HighConcern => match category {
            ResignationAgency | MentalHealth => 5,
            JobAgent => 3,
            CareerCoaching => 2,
            JobBoard => 1,
            SkillUp => 0,
        },
        Classification::ConsideringChange => match category {
            JobAgent => 5,
            JobBoard => 4,
            CareerCoaching => 3,
            SkillUp => 1,
            ResignationAgency | MentalHealth => 0,
        },
        Classification::ChangeRecommended => match category {
            JobAgent | CareerCoaching => 4,
            JobBoard => 3,
            MentalHealth => 2,
            SkillUp => 1,
            ResignationAgency => 0,
        },
        Classification::ImproveCurrent => match category {
            SkillUp => 5,
            CareerCoaching => 4,
            JobBoard => 1,
            JobAgent | ResignationAgency | MentalHealth => 0,
        },
        Classification::WaitAndObserve => match category {
            CareerCoaching => 3,
            SkillUp | JobBoard => 2,
            JobAgent => 1,
            ResignationAgency | MentalHealth => 0,
        },
    }
}

fn score(
    entry: &ServiceEntry,
    classification: Classification,
    ai_tags: &[String],
    blob: &str,
) -> u32 {
    let tag_hits = entry
        .tags
        .iter()
        .filter(|t| ai_tags.iter().any(|a| a.trim().eq_ignore_ascii_case(t)))
        .count() as u32;
    let keyword_hits = entry.keywords.iter().filter(|k| blob.contains(*k)).count() as u32;
    affinity(classification, entry.category)
        + AI_TAG_WEIGHT * tag_hits
        + KEYWORD_WEIGHT * keyword_hits
}

/// Ranks catalog services for one result. Highest score first, catalog order
/// breaks ties, ranks run 1..=n.
pub fn recommend(
    classification: Classification,
    ai_tags: &[String],
    blob: &str,
    limit: usize,
) -> Vec<ServiceRecommendation> {
    let mut scored: Vec<(&ServiceEntry, u32)> = catalog::all()
        .iter()
        .map(|e| (e, score(e, classification, ai_tags, blob)))
        .filter(|(_, s)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(limit);

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (entry, score))| {
            let rank = i as u32 + 1;
            ServiceRecommendation {
                service_id: entry.id.to_string(),
                name: entry.name.to_string(),
                url: entry.url.to_string(),
                category: entry.category.as_str().to_string(),
                tags: entry.tags.iter().map(|t| t.to_string()).collect(),
                score,
                rank,
                priority: priority_for(rank),
            }
        })
        .collect()
}

fn priority_for(rank: u32) -> Priority {
    match rank {
        1 => Priority::High,
        2 | 3 => Priority::Medium,
        _ => Priority::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_contiguous_and_scores_non_increasing() {
        for c in Classification::ALL {
            let recs = recommend(c, &[], "", 10);
            assert!(!recs.is_empty(), "{c:?} should recommend something");
            for (i, r) in recs.iter().enumerate() {
                assert_eq!(r.rank, i as u32 + 1);
            }
            assert!(recs.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn high_concern_leads_with_resignation_support() {
        let recs = recommend(Classification::HighConcern, &[], "辞めたい 限界", 3);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].service_id, "resign-proxy");
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[1].priority, Priority::Medium);
    }

    #[test]
    fn ai_tags_lift_matching_services() {
        let without = recommend(Classification::ConsideringChange, &[], "", 10);
        let with = recommend(
            Classification::ConsideringChange,
            &["IT".to_string(), "engineer".to_string()],
            "",
            10,
        );
        let pos = |recs: &[ServiceRecommendation]| {
            recs.iter().position(|r| r.service_id == "agent-it")
        };
        assert!(pos(&with) < pos(&without));
        assert_eq!(with[0].service_id, "agent-it");
    }

    #[test]
    fn zero_scores_are_dropped_and_limit_applies() {
        let recs = recommend(Classification::ImproveCurrent, &[], "", 10);
        assert!(recs.iter().all(|r| r.score > 0));
        assert!(recs.iter().all(|r| r.service_id != "resign-proxy"));
        assert_eq!(recommend(Classification::ImproveCurrent, &[], "", 1).len(), 1);
    }

    #[test]
    fn everyday_english_does_not_lift_it_services() {
        let plain = recommend(Classification::ConsideringChange, &[], "", 10);
        let prose = recommend(
            Classification::ConsideringChange,
            &[],
            "it was quite busy with the website",
            10,
        );
        assert_eq!(plain, prose);
    }
}
