use std::fmt;

/// Instruction used when the caller asks nothing in particular
pub const DEFAULT_INSTRUCTION: &str = "summarize this audio";

/// A prompt carrying one audio reference followed by an instruction.
///
/// Built once, then handed to the session by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    /// `<audio>{audio_path}</audio>{question}`, falling back to
    /// [`DEFAULT_INSTRUCTION`] when `question` is empty.
    ///
    /// Nothing is escaped or validated: the engine decides whether the audio
    /// is usable, and `audio_path` must not contain the tag delimiters.
    pub fn build(audio_path: &str, question: &str) -> Self {
        let instruction = if question.is_empty() {
            DEFAULT_INSTRUCTION
        } else {
            question
        };
        Prompt(format!("<audio>{audio_path}</audio>{instruction}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Prompt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_follows_closing_tag_verbatim() {
        let prompt = Prompt::build("clips/in.wav", "Translate this, then summarize.");
        assert_eq!(
            prompt.as_str(),
            "<audio>clips/in.wav</audio>Translate this, then summarize."
        );
    }

    #[test]
    fn test_empty_question_uses_default() {
        let prompt = Prompt::build("in.wav", "");
        assert_eq!(prompt.as_str(), format!("<audio>in.wav</audio>{DEFAULT_INSTRUCTION}"));
    }

    #[test]
    fn test_whitespace_question_is_kept() {
        let prompt = Prompt::build("in.wav", " ");
        assert!(prompt.as_str().ends_with("</audio> "));
    }
}
