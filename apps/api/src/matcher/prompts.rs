// Prompt constants for granular per-candidate scoring.

use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;

/// System prompt: the judge scores the PROJECT's fit to one program,
/// never the program's general merits.
pub fn scoring_system() -> String {
    format!(
        "You are a strict evaluator that ONLY scores how well a program fits THIS USER PROJECT. \
        Scores must reflect the PROJECT's needs: sector, stage, funding, and goals. \
        Do NOT describe the program generally. Focus on tailored reasons about the PROJECT. \
        {JSON_ONLY_INSTRUCTION}"
    )
}

/// Scoring prompt template. Replace: {project_name}, {project_description},
/// {project_sectors}, {project_stage}, {project_funding_need},
/// {project_goals}, {program_text}.
pub const SCORING_PROMPT_TEMPLATE: &str = r#"Evaluate fit between the PROJECT and ONE PROGRAM.

PROJECT:
- name: {project_name}
- description: {project_description}
- sectors: {project_sectors}
- stage: {project_stage}
- funding_need: {project_funding_need}
- goals: {project_goals}

PROGRAM (condensed):
{program_text}

Rules:
- sector_match, stage_match, funding_match MUST be one of 0.0, 0.1, ..., 1.0
- goal_alignment MUST be in [0, 1]
- If the program text gives NO explicit evidence for a dimension, that dimension is at most 0.3.
- Partial or implicit evidence: 0.4 - 0.7. Explicit match: 0.8 - 1.0.
- reasons and improvements MUST be PROJECT-specific, short, 2-5 items each,
  preferably in Arabic, and where possible quote a brief snippet from the program text.
Return a JSON object with exactly these keys:
sector_match, stage_match, funding_match, goal_alignment, reasons, improvements."#;
