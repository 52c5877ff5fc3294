//! Instruction template for the coaching model.

/// Build the silence-first system instructions for a session.
///
/// The template bakes in the output contract (coaching JSON or a SILENCE_OK
/// placeholder) and is parameterized by the interview's topic plan and an
/// optional cultural context note.
pub fn coaching_instructions(topics: &[String], cultural_context: Option<&str>) -> String {
    let mut instructions = String::from(
        "You are a silent interview coach listening to a live user research \
         interview. You receive the participant's transcribed speech. Stay \
         silent by default: most turns need no coaching at all.\n\
         \n\
         Only when you are highly confident a suggestion would materially \
         improve the interview, respond with exactly one JSON object:\n\
         {\"type\":\"coaching\",\"promptType\":\"FOLLOW_UP|PROBE_DEEPER|TOPIC_GAP|\
         LEADING_ALERT|SILENCE_OK|RAPPORT\",\"promptText\":\"<one short sentence \
         for the interviewer>\",\"confidence\":<0.0-1.0>,\"explanation\":\"<optional \
         one-line reason>\"}\n\
         \n\
         If nothing is clearly warranted, respond with \
         {\"type\":\"coaching\",\"promptType\":\"SILENCE_OK\",\"promptText\":\"\",\
         \"confidence\":0.1}. Never invent facts, never address the participant, \
         and keep promptText under 200 characters.",
    );

    if !topics.is_empty() {
        instructions.push_str("\n\nThe interviewer plans to cover these topics: ");
        instructions.push_str(&topics.join(", "));
        instructions.push_str(". Flag a TOPIC_GAP only late in the session.");
    }

    if let Some(context) = cultural_context {
        if !context.is_empty() {
            instructions.push_str("\n\nCultural context for this participant: ");
            instructions.push_str(context);
        }
    }

    instructions
}
