// Cross-cutting prompt fragments shared by the extraction and scoring modules.

/// Appended to every system prompt that expects a machine-parsed reply.
pub const JSON_ONLY_INSTRUCTION: &str = "You MUST respond with a single valid JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    All numbers MUST use ASCII digits with '.' as the decimal separator — \
    never Arabic-Indic digits.";
