use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    V1,
    V2,
    V3,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1 => "v1",
            Version::V2 => "v2",
            Version::V3 => "v3",
        }
    }

    pub fn questions(&self) -> &'static [Question] {
        match self {
            Version::V1 => V1_QUESTIONS,
            Version::V2 => V2_QUESTIONS,
            Version::V3 => V3_QUESTIONS,
        }
    }

    /// V3 generates follow-up questions with the chat model.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Version::V3)
    }

    pub fn question(&self, id: &str) -> Option<&'static Question> {
        self.questions().iter().find(|q| q.id == id)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Version::V1),
            "v2" | "2" => Ok(Version::V2),
            "v3" | "3" => Ok(Version::V3),
            other => Err(AppError::UnknownVersion(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice { options: &'static [&'static str] },
    FreeText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Question {
    pub id: &'static str,
    pub text: &'static str,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// First question in sequence order without a non-blank answer.
pub fn next_unanswered(
    version: Version,
    answers: &crate::model::AnswerSet,
) -> Option<&'static Question> {
    version
        .questions()
        .iter()
        .find(|q| answers.get(q.id).map_or(true, |a| a.trim().is_empty()))
}

const FREQUENCY: &[&str] = &["毎日", "週に数回", "月に数回", "ほとんどない"];
const AGREEMENT: &[&str] = &[
    "とてもそう思う",
    "ややそう思う",
    "あまり思わない",
    "まったく思わない",
];

const V1_QUESTIONS: &[Question] = &[
    Question {
        id: "q1",
        text: "今の仕事を辞めたいと思うことはどのくらいありますか？",
        kind: QuestionKind::SingleChoice { options: FREQUENCY },
    },
    Question {
        id: "q2",
        text: "現在の職種と勤続年数を教えてください。",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q3",
        text: "職場の人間関係に満足していますか？",
        kind: QuestionKind::SingleChoice { options: AGREEMENT },
    },
    Question {
        id: "q4",
        text: "給与や待遇は仕事内容に見合っていると思いますか？",
        kind: QuestionKind::SingleChoice { options: AGREEMENT },
    },
    Question {
        id: "q5",
        text: "残業や休日出勤の状況について教えてください。",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q6",
        text: "心身の不調（眠れない、食欲がないなど）を感じることはありますか？",
        kind: QuestionKind::SingleChoice { options: FREQUENCY },
    },
    Question {
        id: "q7",
        text: "今の会社でこの先も成長できると思いますか？",
        kind: QuestionKind::SingleChoice { options: AGREEMENT },
    },
    Question {
        id: "q8",
        text: "一番の不満や悩みを自由に書いてください。",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q9",
        text: "転職活動をしたことはありますか？",
        kind: QuestionKind::SingleChoice {
            options: &[
                "現在している",
                "以前したことがある",
                "考えたことはある",
                "ない",
            ],
        },
    },
    Question {
        id: "q10",
        text: "理想の働き方やキャリアを教えてください。",
        kind: QuestionKind::FreeText,
    },
];

const V2_QUESTIONS: &[Question] = &[
    Question {
        id: "q1",
        text: "今の仕事について、率直な気持ちを教えてください。",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q2",
        text: "仕事でストレスを感じる場面はどんな時ですか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q3",
        text: "上司や同僚との関係はどうですか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q4",
        text: "労働時間について、どう感じていますか？",
        kind: QuestionKind::SingleChoice {
            options: &["長すぎる", "やや長い", "ちょうどいい", "短い"],
        },
    },
    Question {
        id: "q5",
        text: "今の年収に満足していますか？",
        kind: QuestionKind::SingleChoice { options: AGREEMENT },
    },
    Question {
        id: "q6",
        text: "身につけたいスキルや挑戦したいことはありますか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q7",
        text: "体調やメンタル面で気になることはありますか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q8",
        text: "転職や退職について、どの程度考えていますか？",
        kind: QuestionKind::SingleChoice {
            options: &[
                "具体的に動いている",
                "真剣に考えている",
                "たまに考える",
                "考えていない",
            ],
        },
    },
    Question {
        id: "q9",
        text: "仕事を選ぶうえで一番大切にしたいことは何ですか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q10",
        text: "その他、伝えておきたいことがあれば書いてください。",
        kind: QuestionKind::FreeText,
    },
];

/// Seed questions for conversational mode; used verbatim when generation fails.
const V3_QUESTIONS: &[Question] = &[
    Question {
        id: "q1",
        text: "今の仕事で一番つらいと感じていることは何ですか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q2",
        text: "その状況はどのくらい続いていますか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q3",
        text: "仕事のやりがいや、楽しいと感じる瞬間はありますか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q4",
        text: "転職や退職を考えたとき、一番の不安は何ですか？",
        kind: QuestionKind::FreeText,
    },
    Question {
        id: "q5",
        text: "一年後、どんな働き方をしていたいですか？",
        kind: QuestionKind::FreeText,
    },
];
