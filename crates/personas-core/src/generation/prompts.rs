//! Prompt text for persona generation and focus-group answers.

use crate::types::Persona;

/// Reaction context used when a persona has no peers to react to.
pub const NO_PEER_RESPONSES: &str = "No other responses to react to.";

/// Ask for `count` personas as a bare JSON array.
pub fn persona_generation(count: usize, business_context: &str) -> String {
    format!(
        "Given the following business model context, generate exactly {count} diverse personas as a JSON array. \
These personas should represent POTENTIAL CLIENTS from {count} DIFFERENT MARKET SECTORS who would be interested \
in the products/services described. They should NOT be employees of the company, but rather external customers, \
buyers, or decision-makers from different industries or market segments.\n\n\
Each persona should have the following fields: name, role, description, background, goals, age, sex, race. \
The \"goals\" field should be an array of strings representing their key objectives related to the business context.\n\n\
Respond ONLY with the JSON array, no extra text.\n\n\
Business Context:\n{business_context}"
    )
}

/// System instruction placing the model in a persona's voice.
pub fn persona_system(persona: &Persona, business_context: &str) -> String {
    format!(
        "Assume the role of the following persona for a business focus group. You are a client or potential \
client of the business. You are in a general purpose focus group for the business. Here is the business outline:\n\n\
{business_context}\n\n\
Persona:\nName: {}\nRole: {}\nDescription: {}\nBackground: {}\nGoals: {}\nAge: {}\nSex: {}\nRace: {}\n\n\
When asked a question or provided with some info, you must only respond as the persona assigned and in the voice \
of that persona. Your responses should be short and sweet and structured as if given verbally. You should not \
repeat the question or reiterate points from the question as this would not be natural for a conversational style \
interaction verbally. Do not start your answer by restating the question. Do not use phrases like 'As a persona...' \
or 'If I were...'. Just answer as if you are the person.",
        persona.name,
        persona.role,
        persona.description,
        persona.background,
        persona.goals,
        persona.age,
        persona.sex,
        persona.race,
    )
}

/// Follow-up asking for a shorter version of the previous answer.
pub fn succinct(char_limit: usize) -> String {
    format!(
        "Please rephrase your answer in a much more succinct, short, and verbal way. \
Limit your response to {} characters.",
        char_limit
    )
}

/// Second-stage prompt: react to what the other personas said.
///
/// `others` pairs each peer's name with their answer.
pub fn reaction(name: &str, others: &[(String, String)]) -> String {
    let heard = if others.is_empty() {
        NO_PEER_RESPONSES.to_string()
    } else {
        others
            .iter()
            .map(|(peer, answer)| format!("{} said: {}", peer, answer))
            .collect::<Vec<_>>()
            .join("; ")
    };
    format!(
        "Thank you {} for the interesting answer. Does what you heard from the others change what you think \
in any way? You heard: {}",
        name, heard
    )
}

pub fn headshot(persona: &Persona) -> String {
    format!(
        "Business Appropriate Headshot of {}, a {}. {}, {}, {}. The headshot should be tightly cropped, \
centered on the face, with the full head visible and minimal chest.",
        persona.name, persona.role, persona.age, persona.sex, persona.race
    )
}

/// Remove a surrounding markdown code fence (```json or ```).
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_prefix("json").unwrap_or(rest);
        body = body.strip_suffix("```").unwrap_or(body);
    }
    body.trim()
}
