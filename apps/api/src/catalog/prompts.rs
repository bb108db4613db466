// Prompt constants for the program extractor. The catalog source is
// Arabic Markdown, so the field-semantics instructions are Arabic too.

use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;

/// System instructions for structured extraction. Enumerates the field
/// semantics: stage-ladder normalization, funding-type enumeration with
/// the in-kind fallback, ISO date normalization, and id-as-slug.
pub fn extraction_system() -> String {
    format!("{EXTRACTION_RULES}\n\n{JSON_ONLY_INSTRUCTION}")
}

const EXTRACTION_RULES: &str = r#"أنت محلّل يستخرج حقولًا منظّمة من Markdown عربي يصف برنامج دعم أو مبادرة.
أعد المخرجات ككائن JSON واحد بهذه المفاتيح بالضبط:
id, name, description, objectives, goals, features, eligibility_must,
sector_tags, stage_tags, url, last_updated, launch_date, funding_type,
funding_min, funding_max, program_type, objectives_text

المتطلبات:
- استنبط id كـ slug من name (بدون مسافات أو تشكيل).
- last_updated: إن وجدت صيغة مثل "2025-08-15 14:21" حوّلها إلى ISO8601 "2025-08-15T14:21:00".
- launch_date: إذا كان "مارس 2025" حوّله إلى "2025-03". إن تعذّر، أعد YYYY فقط.
- funding_type: اختر واحدة فقط من: grant, loan, equity, in-kind. إن لم توجد مبالغ نقدية واضحة، استخدم in-kind.
- funding_min/funding_max: إن لم تتوافر أرقام، اجعلها 0.
- نظّف التكرارات في القوائم.
- sector_tags: رشّح وسوم قطاعات تناسب النص (مثل: الصحة، تقنية صحية، التجارة الإلكترونية، ذكاء اصطناعي).
- stage_tags: اختر من: فكرة، MVP، إطلاق، تشغيل، نمو مبكر، نمو، توسع — بحسب دلالات النص.
- program_type: إن احتوى العنوان على "مبادرة" فأعد "مبادرة/تمكين" وإلا "برنامج".
- objectives_text: لخص الأهداف في سطر أو سطرين.
- التزم بالمصدر فقط، لا تضف معلومات من خارج النص.
- إن تعذّر إيجاد حقل، لا تتركه فارغًا: استنبط وصفًا موجزًا من الفقرات الأولى واستخرج الأهداف من البنود."#;

/// Extraction prompt template. Replace `{markdown}` and `{notes}`.
pub const EXTRACTION_PROMPT_TEMPLATE: &str = "المصدر (Markdown):\n\n{markdown}\n\nملاحظات إضافية: {notes}";
