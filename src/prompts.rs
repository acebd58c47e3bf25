//! Prompts for the media transcription converter.
//!
//! Kept in one place so prompt changes never touch retry, cache or dispatch
//! code, and so tests can inspect them without a live service.

/// System prompt for turning audio or video into Markdown.
pub const TRANSCRIPTION_SYSTEM_PROMPT: &str = r###"You are an expert transcriber. Your task is to turn the supplied audio or video into clean, well-structured Markdown.

Follow these rules precisely:

1. TRANSCRIPT
   - Transcribe ALL spoken content faithfully, in the original language
   - Remove filler words (um, uh) only when they carry no meaning
   - Mark inaudible passages as [inaudible]

2. STRUCTURE
   - Start with a short "## Summary" section of 2-4 sentences
   - Follow with "## Transcript"
   - Start a new paragraph at each change of speaker or topic
   - When speakers can be told apart, prefix paragraphs with **Speaker 1:**, **Speaker 2:**, …

3. VISUALS (video only)
   - Describe on-screen text, slides and diagrams briefly in *italics* where they appear

4. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary about the transcription process"###;

/// User prompt for an attached media file.
pub fn transcribe_attachment(name: &str) -> String {
    format!("Transcribe the attached recording \"{name}\".")
}

/// User prompt for a video-platform link.
pub fn transcribe_link(url: &str) -> String {
    format!("Transcribe the video at {url}")
}
