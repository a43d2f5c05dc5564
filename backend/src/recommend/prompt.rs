use shared::Language;
use std::fmt::Write;

use super::RecommendationRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_EN: &str = "You are a physician specialising in wound care. Give appropriate and safe wound-care advice.

Guidelines:
1. Give safe first-aid level advice.
2. Stress when a doctor should be consulted.
3. Use plain, easy to understand language.
4. List the warning signs that need urgent medical attention.
5. Answer in English only.";

const SYSTEM_TH: &str = "คุณเป็นแพทย์ผู้เชี่ยวชาญด้านการดูแลแผล กรุณาให้คำแนะนำการดูแลแผลที่เหมาะสมและปลอดภัย

หลักการให้คำแนะนำ:
1. ให้คำแนะนำเบื้องต้นที่ปลอดภัย
2. เน้นความสำคัญของการปรึกษาแพทย์หากจำเป็น
3. ใช้ภาษาที่เข้าใจง่าย
4. ระบุสัญญาณเตือนที่ต้องรีบพบแพทย์
5. ตอบเป็นภาษาไทยเท่านั้น";

pub fn build_prompt(request: &RecommendationRequest) -> Prompt {
    let language = request.language;
    let label = request.classification.label.localized_name(language);
    let confidence = request.classification.confidence * 100.0;

    let mut features = String::new();
    for feature in &request.features {
        let _ = writeln!(features, "- {}", feature.description);
    }
    if features.is_empty() {
        features.push_str(match language {
            Language::En => "- No distinctive features were detected\n",
            Language::Th => "- ไม่พบลักษณะเด่นของแผล\n",
        });
    }

    let (system, user) = match language {
        Language::En => (
            SYSTEM_EN,
            format!(
                "Wound type: {label}
System confidence: {confidence:.1}%

Observed wound features:
{features}
Please give suitable wound-care advice covering:
1. Cleaning the wound
2. First aid
3. Follow-up care
4. Warning signs that need a doctor

Keep the advice to roughly 150-200 words."
            ),
        ),
        Language::Th => (
            SYSTEM_TH,
            format!(
                "ประเภทแผล: {label}
ความมั่นใจของระบบ: {confidence:.1}%

ลักษณะแผลที่พบ:
{features}
กรุณาให้คำแนะนำการดูแลแผลที่เหมาะสม รวมถึง:
1. การทำความสะอาดแผล
2. การปฐมพยาบาล
3. การดูแลติดตาม
4. สัญญาณเตือนที่ต้องพบแพทย์

คำแนะนำควรมีความยาวประมาณ 150-200 คำ"
            ),
        ),
    };

    Prompt {
        system: system.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ClassLabel, ClassificationResult, FeatureMatch};

    fn request(language: Language, features: Vec<&str>) -> RecommendationRequest {
        RecommendationRequest {
            classification: ClassificationResult {
                label: ClassLabel::Burn,
                confidence: 0.8731,
                probabilities: vec![0.02, 0.03, 0.8731, 0.05, 0.0269],
            },
            features: features
                .into_iter()
                .enumerate()
                .map(|(i, d)| FeatureMatch {
                    feature_id: format!("f{}", i),
                    description: d.to_string(),
                    labels: vec![ClassLabel::Burn],
                    similarity: 0.5,
                })
                .collect(),
            language,
        }
    }

    #[test]
    fn english_prompt_lists_features_in_order() {
        let prompt = build_prompt(&request(Language::En, vec!["Blistering", "Redness"]));
        assert!(prompt.system.contains("English only"));
        assert!(prompt.user.contains("Wound type: Burn"));
        assert!(prompt.user.contains("87.3%"));
        let blister = prompt.user.find("- Blistering").unwrap();
        let redness = prompt.user.find("- Redness").unwrap();
        assert!(blister < redness);
    }

    #[test]
    fn thai_prompt_uses_localized_label() {
        let prompt = build_prompt(&request(Language::Th, vec![]));
        assert!(prompt.system.contains("ภาษาไทย"));
        assert!(prompt.user.contains("ประเภทแผล: แผลไฟไหม้"));
        assert!(prompt.user.contains("ไม่พบลักษณะเด่นของแผล"));
    }
}
