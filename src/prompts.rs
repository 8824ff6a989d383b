//! Prompts for structured JSON extraction.
//!
//! OCR itself needs no prompt; these are only sent to the chat model in
//! structured mode.

/// System message framing every structured-extraction request.
pub const STRUCTURED_SYSTEM_PROMPT: &str = "You convert OCR output into a single well-formed JSON object. \
Reply with JSON only: no Markdown fences, no commentary.";

/// Instruction appended after the OCR text.
pub const STRUCTURED_INSTRUCTION: &str = "Convert this into a sensible structured json response. \
The output should be strictly be json with no extra commentary";

/// User prompt for an image: the image is attached alongside its OCR text.
pub fn image_prompt(ocr_markdown: &str) -> String {
    format!("This is image's OCR in markdown:\n\n{ocr_markdown}\n.\n{STRUCTURED_INSTRUCTION}")
}

/// User prompt for a converted PDF, sent as text only.
pub fn document_prompt(markdown: &str) -> String {
    format!("This is document's OCR in markdown:\n\n{markdown}\n.\n{STRUCTURED_INSTRUCTION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_embed_markdown_and_instruction() {
        let p = image_prompt("# Receipt");
        assert!(p.starts_with("This is image's OCR"));
        assert!(p.contains("# Receipt"));
        assert!(p.ends_with(STRUCTURED_INSTRUCTION));

        let d = document_prompt("body");
        assert!(d.contains("document's OCR"));
        assert!(d.contains("\n\nbody\n.\n"));
    }
}
