use shared::{ClassLabel, Language};

pub const DISCLAIMER_EN: &str = "⚠️ Note: this advice is general first-aid information only. If symptoms are severe or do not improve, please consult a doctor immediately.";
pub const DISCLAIMER_TH: &str = "⚠️ หมายเหตุ: คำแนะนำนี้เป็นเพียงข้อมูลเบื้องต้น หากมีอาการรุนแรงหรือไม่ดีขึ้น กรุณาปรึกษาแพทย์ทันที";

const DOCTOR_MENTIONS_EN: [&str; 3] = ["doctor", "physician", "medical attention"];
const DOCTOR_MENTIONS_TH: [&str; 2] = ["ปรึกษาแพทย์", "พบแพทย์"];

const SENTENCE_ENDS: [char; 5] = ['.', '!', '?', '\n', '。'];

pub fn disclaimer(language: Language) -> &'static str {
    match language {
        Language::En => DISCLAIMER_EN,
        Language::Th => DISCLAIMER_TH,
    }
}

fn template(label: ClassLabel, language: Language) -> &'static str {
    match (label, language) {
        (ClassLabel::Abrasion, Language::En) => "Caring for an abrasion:
1. Wash your hands before touching the wound.
2. Rinse the wound gently with clean water to remove dirt.
3. Pat it dry with a clean cloth.
4. Apply an antibiotic ointment and cover with a bandage.
5. Change the bandage every day.

Warning signs: if the wound becomes red, swollen, pus-filled, smelly or more painful, see a doctor promptly.",
        (ClassLabel::Bruise, Language::En) => "Caring for a bruise:
1. Apply a cold compress during the first 24 hours (15-20 minutes at a time).
2. Keep the bruised area raised above heart level.
3. Avoid massaging or pressing hard on it.
4. Switch to a warm compress after 48 hours.
5. Take pain relief as needed.

Warning signs: if swelling is severe, pain is intense, or it does not improve within a week, see a doctor.",
        (ClassLabel::Burn, Language::En) => "Caring for a burn:
1. Move away from the heat source immediately.
2. Cool the burn under cool running water for 10-20 minutes.
3. Remove jewellery before the area swells.
4. Do not pop blisters; cover loosely with a clean dressing.
5. Avoid ice, toothpaste or butter.

Warning signs: large, deep or heavily blistered burns need hospital care straight away.",
        (ClassLabel::Cut, Language::En) => "Caring for a cut:
1. Press on the wound with a clean cloth to stop the bleeding.
2. Rinse the wound with clean water once the bleeding stops.
3. Apply an antibiotic ointment.
4. Cover with a bandage or plaster.
5. Change the dressing daily and keep it dry.

Warning signs: if the cut is deep, keeps bleeding, or has something stuck in it, see a doctor promptly.",
        (ClassLabel::Normal, Language::En) => "Normal skin:
Your skin looks healthy!
1. Keep your skin clean.
2. Use a moisturiser to prevent dryness.
3. Avoid scratching or rubbing hard.
4. Use sunscreen when outdoors.
5. Drink enough water to keep your skin hydrated.

Good skin care helps prevent injuries and keeps skin healthy.",
        (ClassLabel::Abrasion, Language::Th) => "การดูแลแผลถลอก:
1. ล้างมือให้สะอาดก่อนสัมผัสแผล
2. ล้างแผลด้วยน้ำสะอาดเบาๆ เอาสิ่งสกปรกออก
3. ใช้ผ้าสะอาดซับให้แห้ง
4. ทายาปฏิชีวนะและปิดแผลด้วยผ้าพันแผล
5. เปลี่ยนผ้าพันแผลทุกวัน

สัญญาณเตือน: หากแผลแดงบวม มีหนอง มีกลิ่น หรือเจ็บมากขึ้น ให้รีบพบแพทย์",
        (ClassLabel::Bruise, Language::Th) => "การดูแลรอยช้ำ:
1. ประคบเย็นในช่วง 24 ชั่วโมงแรก (15-20 นาทีต่อครั้ง)
2. ยกส่วนที่ช้ำให้สูงกว่าระดับหัวใจ
3. หลีกเลี่ยงการนวดหรือกดแรงๆ
4. ประคบอุ่นหลังจาก 48 ชั่วโมง
5. รับประทานยาแก้ปวดตามความจำเป็น

สัญญาณเตือน: หากบวมมาก เจ็บอย่างมาก หรือไม่ดีขึ้นใน 1 สัปดาห์ ให้พบแพทย์",
        (ClassLabel::Burn, Language::Th) => "การดูแลแผลไฟไหม้:
1. หยุดการสัมผัสกับความร้อนทันที
2. ล้างด้วยน้ำเย็นนาน 10-20 นาที
3. เอาเครื่องประดับออกก่อนบวม
4. ห้ามแกะพุพอง ใช้ผ้าสะอาดปิดแผล
5. หลีกเลี่ยงน้ำแข็ง ยาสีฟัน หรือเนย

สัญญาณเตือน: แผลไหม้ขนาดใหญ่ ลึก หรือมีพุพองมาก ให้รีบไปโรงพยาบาล",
        (ClassLabel::Cut, Language::Th) => "การดูแลแผลบาด:
1. กดแผลด้วยผ้าสะอาดเพื่อห้ามเลือด
2. ล้างแผลด้วยน้ำสะอาดเมื่อเลือดหยุด
3. ใช้ยาปฏิชีวนะทาแผล
4. ปิดแผลด้วยผ้าพันแผลหรือพลาสเตอร์
5. เปลี่ยนผ้าพันแผลทุกวันและดูแลให้แห้ง

สัญญาณเตือน: หากแผลลึก เลือดไหลไม่หยุด หรือมีสิ่งแปลกปลอมในแผล ให้รีบพบแพทย์",
        (ClassLabel::Normal, Language::Th) => "ผิวหนังปกติ:
ผิวหนังของคุณดูปกติดี!
1. ทำความสะอาดผิวหนังอย่างสม่ำเสมอ
2. ใช้ครีมบำรุงผิวเพื่อป้องกันความแห้ง
3. หลีกเลี่ยงการขูดขีดหรือเกาแรงๆ
4. ใช้ครีมกันแดดเมื่อออกแดด
5. ดื่มน้ำให้เพียงพอเพื่อผิวหนังชุ่มชื้น

การดูแลผิวหนังที่ดีจะช่วยป้องกันการบาดเจ็บและรักษาสุขภาพผิว",
    }
}

/// Deterministic local advice for `label`, always ending with the disclaimer.
pub fn fallback_text(label: ClassLabel, language: Language) -> String {
    format!("{}\n\n{}", template(label, language), disclaimer(language))
}

/// Cuts `text` to at most `max_chars` characters, ending on the last
/// sentence boundary inside the limit. Falls back to the last whitespace,
/// then to a hard cut.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> &str {
    let limit = match text.char_indices().nth(max_chars) {
        Some((byte, _)) => byte,
        None => return text,
    };
    let head = &text[..limit];

    if let Some((i, c)) = head
        .char_indices()
        .filter(|(_, c)| SENTENCE_ENDS.contains(c))
        .last()
    {
        return head[..i + c.len_utf8()].trim_end();
    }
    if let Some(i) = head.rfind(char::is_whitespace) {
        if i > 0 {
            return head[..i].trim_end();
        }
    }
    head
}

/// Truncates generated advice to `max_chars` characters. The disclaimer is
/// appended inside that budget unless the kept text already tells the reader
/// to see a doctor.
pub fn post_process(text: &str, language: Language, max_chars: usize) -> String {
    let text = text.trim();
    let body = truncate_at_sentence(text, max_chars);
    if mentions_doctor(body, language) {
        return body.to_string();
    }

    let disclaimer = disclaimer(language);
    let reserved = disclaimer.chars().count() + 2;
    let body = truncate_at_sentence(text, max_chars.saturating_sub(reserved));
    if body.is_empty() {
        return truncate_at_sentence(disclaimer, max_chars).to_string();
    }
    format!("{}\n\n{}", body, disclaimer)
}

fn mentions_doctor(text: &str, language: Language) -> bool {
    match language {
        Language::En => {
            let lowered = text.to_lowercase();
            DOCTOR_MENTIONS_EN.iter().any(|m| lowered.contains(m))
        }
        Language::Th => DOCTOR_MENTIONS_TH.iter().any(|m| text.contains(m)),
    }
}
