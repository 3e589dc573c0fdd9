//! Keyword-scoring classifier used when the model path is unavailable.
//!
//! Pure and allocation-light: no I/O, bounded by keyword count × answer length.

use crate::model::{
    ActionPlan, AnswerSet, Classification, Confidence, DiagnosisResult, DiagnosisSource, Urgency,
};

pub const STRESS_TERMS: &[&str] = &[
    "辞めたい",
    "ストレス",
    "限界",
    "理不尽",
    "パワハラ",
    "モラハラ",
    "残業",
    "疲れ",
    "眠れ",
    "つらい",
    "辛い",
    "しんどい",
    "うつ",
    "ブラック",
    "怒鳴",
    "体調",
    "burnout",
    "stress",
];

pub const TRANSFER_TERMS: &[&str] = &[
    "転職",
    "退職",
    "他社",
    "求人",
    "エージェント",
    "キャリアチェンジ",
    "年収アップ",
    "次の仕事",
    "job change",
    "quit my job",
];

pub const GROWTH_TERMS: &[&str] = &[
    "成長",
    "スキル",
    "昇進",
    "キャリアアップ",
    "挑戦",
    "学び",
    "資格",
    "やりがい",
    "promotion",
    "skill",
];

/// Decision thresholds, tunable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierThresholds {
    pub high_concern_stress: usize,
    pub considering_transfer: usize,
    pub change_stress: usize,
    pub improve_growth: usize,
    pub qualifier_stress: usize,
    pub qualifier_transfer: usize,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            high_concern_stress: 2,
            considering_transfer: 1,
            change_stress: 1,
            improve_growth: 2,
            qualifier_stress: 3,
            qualifier_transfer: 2,
        }
    }
}

impl ClassifierThresholds {
    /// Overrides from `FALLBACK_*` environment variables; unset or invalid values keep the default.
    pub fn from_env() -> Self {
        fn read(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(default)
        }
        let d = Self::default();
        Self {
            high_concern_stress: read("FALLBACK_HIGH_CONCERN_STRESS", d.high_concern_stress),
            considering_transfer: read("FALLBACK_CONSIDERING_TRANSFER", d.considering_transfer),
            change_stress: read("FALLBACK_CHANGE_STRESS", d.change_stress),
            improve_growth: read("FALLBACK_IMPROVE_GROWTH", d.improve_growth),
            qualifier_stress: read("FALLBACK_QUALIFIER_STRESS", d.qualifier_stress),
            qualifier_transfer: read("FALLBACK_QUALIFIER_TRANSFER", d.qualifier_transfer),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeywordScores {
    pub stress: usize,
    pub transfer: usize,
    pub growth: usize,
}

/// Lowercased concatenation of every non-blank answer.
pub fn answer_blob(answers: &AnswerSet) -> String {
    answers
        .answered()
        .map(|(_, a)| a)
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
}

/// Distinct terms present per keyword set; frequency does not matter.
pub fn score(blob: &str) -> KeywordScores {
    let distinct = |terms: &[&str]| terms.iter().filter(|t| blob.contains(*t)).count();
    KeywordScores {
        stress: distinct(STRESS_TERMS),
        transfer: distinct(TRANSFER_TERMS),
        growth: distinct(GROWTH_TERMS),
    }
}

/// First matching rule wins.
pub fn decide(scores: KeywordScores, t: &ClassifierThresholds) -> (Classification, Urgency) {
    if scores.stress >= t.high_concern_stress {
        (Classification::HighConcern, Urgency::High)
    } else if scores.transfer >= t.considering_transfer {
        (Classification::ConsideringChange, Urgency::Medium)
    } else if scores.stress >= t.change_stress {
        (Classification::ChangeRecommended, Urgency::Medium)
    } else if scores.growth >= t.improve_growth {
        (Classification::ImproveCurrent, Urgency::Low)
    } else {
        (Classification::WaitAndObserve, Urgency::Low)
    }
}

const STRESS_QUALIFIER: &str =
    " 特に心身への負担が大きい様子がうかがえるため、無理をしないことを最優先にしてください。";
const TRANSFER_QUALIFIER: &str =
    " 転職への意欲がはっきり表れているので、具体的な準備を始める良いタイミングです。";

/// Classifies `answers` without calling the model. Never fails.
///
/// The returned result carries no recommendations; callers attach them.
pub fn classify(
    answers: &AnswerSet,
    thresholds: &ClassifierThresholds,
    is_partial: bool,
) -> DiagnosisResult {
    let scores = score(&answer_blob(answers));
    let (classification, urgency) = decide(scores, thresholds);

    let mut summary = summary_for(classification).to_string();
    if scores.stress >= thresholds.qualifier_stress {
        summary.push_str(STRESS_QUALIFIER);
    } else if scores.transfer >= thresholds.qualifier_transfer {
        summary.push_str(TRANSFER_QUALIFIER);
    }

    DiagnosisResult {
        classification,
        urgency,
        confidence: Confidence::from_answer_count(answers.answered_count()),
        summary,
        advice: advice_for(classification).to_string(),
        action_plan: actions_for(classification),
        recommendations: Vec::new(),
        source: DiagnosisSource::RuleBased,
        is_partial,
    }
}

pub fn summary_for(classification: Classification) -> &'static str {
    match classification {
        Classification::HighConcern => {
            "強いストレスや負担を抱えている状態です。今の環境から距離を置くことを真剣に検討する段階にあります。"
        }
        Classification::ConsideringChange => {
            "転職を視野に入れて動き始めている状態です。情報を集めながら、自分に合う選択肢を比較していきましょう。"
        }
        Classification::ChangeRecommended => {
            "今の職場に負担を感じ始めています。状況が続くようであれば、環境を変えることも選択肢に入れましょう。"
        }
        Classification::ImproveCurrent => {
            "成長意欲が高く、今の職場でもまだ伸ばせる余地があります。まずは現職での改善を試してみましょう。"
        }
        Classification::WaitAndObserve => {
            "今すぐ大きな決断をする必要はなさそうです。しばらく様子を見ながら、自分の気持ちの変化に目を向けましょう。"
        }
    }
}

pub(crate) fn advice_for(classification: Classification) -> &'static str {
    match classification {
        Classification::HighConcern => {
            "一人で抱え込まず、信頼できる人や専門家に相談してください。退職の手続きが負担なら代行サービスの利用も検討できます。"
        }
        Classification::ConsideringChange => {
            "転職エージェントを活用すると、市場価値の把握と求人探しを効率よく進められます。"
        }
        Classification::ChangeRecommended => {
            "不満の原因を書き出し、社内で解決できるものと転職でしか解決できないものを分けてみましょう。"
        }
        Classification::ImproveCurrent => {
            "上司との面談で目標を共有し、スキルアップの機会を積極的に求めてみましょう。"
        }
        Classification::WaitAndObserve => {
            "定期的に気持ちを振り返り、変化があれば改めて診断してみてください。"
        }
    }
}

pub fn actions_for(classification: Classification) -> ActionPlan {
    match classification {
        Classification::HighConcern => plan(
            &["十分な睡眠と休息を確保する", "信頼できる人に今の状況を話す"],
            &["心療内科や産業医への相談を検討する", "退職や休職の選択肢を調べる"],
            &["心身に無理のない働き方を見つける"],
        ),
        Classification::ConsideringChange => plan(
            &["転職サイトに登録して求人を眺めてみる"],
            &["職務経歴書を作成する", "転職エージェントと面談する"],
            &["希望条件に合う企業へ応募する"],
        ),
        Classification::ChangeRecommended => plan(
            &["不満に感じていることを書き出す"],
            &["上司や人事に改善を相談する", "社外の選択肢について情報収集する"],
            &["改善が見込めなければ転職活動を始める"],
        ),
        Classification::ImproveCurrent => plan(
            &["今期の目標を上司と確認する"],
            &["伸ばしたいスキルの学習計画を立てる"],
            &["社内での異動や昇進の機会を狙う"],
        ),
        Classification::WaitAndObserve => plan(
            &["今の仕事で良いと感じている点を整理する"],
            &["月に一度、気持ちの変化を記録する"],
            &["キャリアの方向性をゆっくり考える"],
        ),
    }
}

fn plan(immediate: &[&str], short_term: &[&str], long_term: &[&str]) -> ActionPlan {
    let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    ActionPlan {
        immediate: owned(immediate),
        short_term: owned(short_term),
        long_term: owned(long_term),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> AnswerSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn stress_terms_take_precedence() {
        let a = answers(&[("q1", "ストレスで限界。転職したいしスキルも伸ばしたい、成長したい")]);
        let r = classify(&a, &ClassifierThresholds::default(), false);
        assert_eq!(r.classification, Classification::HighConcern);
        assert_eq!(r.urgency, Urgency::High);
        assert_eq!(r.source, DiagnosisSource::RuleBased);
    }

    #[test]
    fn resignation_scenario_is_high_concern() {
        let a = answers(&[("q1", "毎日辞めたい、上司が理不尽でストレスで限界")]);
        let r = classify(&a, &ClassifierThresholds::default(), true);
        assert_eq!(r.classification, Classification::HighConcern);
        assert_eq!(r.urgency, Urgency::High);
        assert!(!r.summary.is_empty());
        assert!(!r.action_plan.immediate.is_empty());
        assert_eq!(r.confidence, Confidence::Low);
        assert!(r.is_partial);
        // four stress terms → qualifier appended
        assert!(r.summary.ends_with(STRESS_QUALIFIER));
    }

    #[test]
    fn strong_transfer_intent_appends_qualifier() {
        let a = answers(&[("q1", "転職したい、求人を見ている")]);
        let r = classify(&a, &ClassifierThresholds::default(), false);
        assert_eq!(r.classification, Classification::ConsideringChange);
        assert_eq!(r.urgency, Urgency::Medium);
        assert!(r.summary.ends_with(TRANSFER_QUALIFIER));

        let one = answers(&[("q1", "転職も少し考える")]);
        let r = classify(&one, &ClassifierThresholds::default(), false);
        assert_eq!(r.classification, Classification::ConsideringChange);
        assert_eq!(r.summary, summary_for(Classification::ConsideringChange));
    }

    #[test]
    fn thresholds_read_overrides_from_env() {
        std::env::set_var("FALLBACK_HIGH_CONCERN_STRESS", "4");
        std::env::set_var("FALLBACK_QUALIFIER_TRANSFER", "not-a-number");
        let t = ClassifierThresholds::from_env();
        std::env::remove_var("FALLBACK_HIGH_CONCERN_STRESS");
        std::env::remove_var("FALLBACK_QUALIFIER_TRANSFER");

        assert_eq!(t.high_concern_stress, 4);
        let d = ClassifierThresholds::default();
        assert_eq!(t.qualifier_transfer, d.qualifier_transfer);
        assert_eq!(t.considering_transfer, d.considering_transfer);
    }

    #[test]
    fn short_english_words_do_not_count_as_terms() {
        let scores = score("it was quite fine with the team");
        assert_eq!(scores, KeywordScores::default());
        assert_eq!(score("i want to quit my job").transfer, 1);
    }

    #[test]
    fn no_keywords_waits_and_scales_confidence_by_count() {
        let few = answers(&[("q1", "普通です"), ("q2", "特にない")]);
        let r = classify(&few, &ClassifierThresholds::default(), false);
        assert_eq!(r.classification, Classification::WaitAndObserve);
        assert_eq!(r.urgency, Urgency::Low);
        assert_eq!(r.confidence, Confidence::Low);

        let many: AnswerSet = (1..=6).map(|i| (format!("q{i}"), "普通")).collect();
        let r = classify(&many, &ClassifierThresholds::default(), false);
        assert_eq!(r.classification, Classification::WaitAndObserve);
        assert_eq!(r.confidence, Confidence::High);
    }

    #[test]
    fn empty_answers_still_produce_a_result() {
        let r = classify(&AnswerSet::new(), &ClassifierThresholds::default(), true);
        assert_eq!(r.classification, Classification::WaitAndObserve);
        assert_eq!(r.confidence, Confidence::Low);
        assert!(!r.action_plan.immediate.is_empty());
    }

    #[test]
    fn policy_order() {
        let t = ClassifierThresholds::default();
        let s = |stress, transfer, growth| KeywordScores {
            stress,
            transfer,
            growth,
        };
        assert_eq!(decide(s(1, 1, 0), &t).0, Classification::ConsideringChange);
        assert_eq!(decide(s(1, 0, 5), &t).0, Classification::ChangeRecommended);
        assert_eq!(decide(s(0, 0, 2), &t), (Classification::ImproveCurrent, Urgency::Low));
        assert_eq!(decide(s(0, 0, 1), &t).0, Classification::WaitAndObserve);
    }

    #[test]
    fn scores_count_distinct_terms_only() {
        let scores = score("ストレス ストレス ストレス");
        assert_eq!(scores.stress, 1);
        assert_eq!(score(&answer_blob(&answers(&[("q1", "STRESS and Burnout")]))).stress, 2);
    }

    #[test]
    fn thresholds_are_configurable() {
        let strict = ClassifierThresholds {
            high_concern_stress: 5,
            ..ClassifierThresholds::default()
        };
        let a = answers(&[("q1", "ストレスで限界")]);
        assert_eq!(classify(&a, &strict, false).classification, Classification::ChangeRecommended);
    }

    #[test]
    fn every_classification_has_templates() {
        for c in Classification::ALL {
            assert!(!summary_for(c).is_empty());
            assert!(!advice_for(c).is_empty());
            let plan = actions_for(c);
            assert!(!plan.immediate.is_empty());
            assert!(!plan.short_term.is_empty());
            assert!(!plan.long_term.is_empty());
        }
    }
}
