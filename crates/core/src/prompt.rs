//! Prompt construction for cited answers.
//!
//! Both prompt variants demand the same reply shape: one paragraph without
//! line breaks, `<hr/>`, then a `<div class="llm-sources"><ol>` block whose
//! items read `<a-tag> — [sources: doc <id> chunk <index>] — Confidence: <n>%`.
//! Unsupported questions must be answered with the literal `I don't know.`.

use crate::chunking::single_line;
use crate::models::{ChatConversation, RetrievedChunk, HISTORY_TURNS};

pub const UNKNOWN_ANSWER: &str = "I don't know.";

const SNIPPET_SEPARATOR: &str = "\n\n---\n\n";

const OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (required):
1) A single, clear, factual paragraph answering the user's question. This paragraph must contain no line breaks.
2) Immediately after the paragraph output a horizontal rule: <hr/>
3) After the <hr/>, output an HTML sources block exactly as follows:

<div class="llm-sources">
<ol>
    <li> <document_html_link> — [sources: doc <doc_id> chunk <chunk_index>] — Confidence: <confidence>%</li>
</ol>
</div>

RULES FOR THE SOURCES BLOCK:
- <document_html_link> must be one of the "Document html link" values from the snippets, copied unchanged. Do not invent URLs.
- <doc_id> and <chunk_index> must match the "Document id" and "Chunk index" of the cited snippet.
- <confidence> is an integer from 0 to 100 saying how strongly the snippet supports the answer. The "Estimated confidence (from distance)" line is guidance only; use your own judgement.
- Emit one <li> per snippet you relied on, most important first.
- When answering "I don't know.", still emit the sources block. It may be empty (<ol></ol>) or list the nearest snippets you inspected with low confidence."#;

/// Heuristic confidence from a cosine distance: `clamp(round(100 - 100d), 0, 100)`.
pub fn estimated_confidence(distance: f64) -> u8 {
    if distance.is_nan() {
        return 0;
    }
    (100.0 - distance * 100.0).round().clamp(0.0, 100.0) as u8
}

pub fn render_snippets(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let document = &chunk.document;
            let metadata = document
                .metadata
                .as_ref()
                .map(|value| value.to_string())
                .unwrap_or_default();
            let size = document.size.map(|size| size.to_string()).unwrap_or_default();

            format!(
                "Snippet {number}:\n\
                 Document id: {id}\n\
                 Document name: {name}\n\
                 Document file: {file}\n\
                 Document content_type: {content_type}\n\
                 Document size: {size}\n\
                 Document metadata: {metadata}\n\
                 Document created_at: {created_at}\n\
                 Chunk index: {chunk_index}\n\
                 Embedding distance: {distance}\n\
                 Estimated confidence (from distance): {confidence}\n\
                 Document html link: {link}\n\
                 \n\
                 {text}",
                number = position + 1,
                id = document.id,
                name = document.name,
                file = document.file_path,
                content_type = document.content_type.as_deref().unwrap_or_default(),
                created_at = document.created_at.to_rfc3339(),
                chunk_index = chunk.chunk_index,
                distance = chunk.distance,
                confidence = estimated_confidence(chunk.distance),
                link = chunk.document_link,
                text = single_line(&chunk.text),
            )
        })
        .collect::<Vec<_>>()
        .join(SNIPPET_SEPARATOR)
}

pub fn render_history(history: &[ChatConversation]) -> String {
    let start = history.len().saturating_sub(HISTORY_TURNS);
    history[start..]
        .iter()
        .map(|turn| format!("{}: {}\n", turn.sender.speaker(), single_line(&turn.message)))
        .collect()
}

pub fn first_answer_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    format!(
        "You are an intelligent assistant that answers using ONLY the provided document snippets.\n\n\
         Each snippet includes a \"Document html link\" field holding a ready-to-use HTML <a> tag for its document.\n\n\
         RESTRICTIONS:\n\
         - Use ONLY facts directly present in the snippets below. Do not hallucinate.\n\
         - If the answer cannot be found in the provided context, reply exactly: \"{UNKNOWN_ANSWER}\"\n\
         - The output must follow the exact format described below, with no extra commentary.\n\n\
         CONTEXT:\n\
         {context}\n\n\
         USER QUESTION:\n\
         {question}\n\n\
         {OUTPUT_FORMAT}\n\n\
         Now answer the USER QUESTION using the context and follow the OUTPUT FORMAT exactly.\n",
        context = render_snippets(chunks),
        question = question.trim(),
    )
}

pub fn follow_up_prompt(
    chunks: &[RetrievedChunk],
    question: &str,
    history: &[ChatConversation],
) -> String {
    format!(
        "You are an intelligent assistant that answers using ONLY the provided document snippets and the recent conversation history.\n\n\
         GUIDELINES:\n\
         - Use ONLY facts contained in the snippets and the conversation history below. Do not hallucinate or add outside facts.\n\
         - If the answer cannot be found in the provided context, reply exactly: \"{UNKNOWN_ANSWER}\"\n\
         - The output MUST follow the exact HTML format described below, with no extra commentary and no extra line breaks.\n\n\
         RECENT CONVERSATION (oldest -> newest):\n\
         {history}\n\
         DOCUMENT SNIPPETS (each includes a ready-to-use \"Document html link\" <a> tag):\n\
         {context}\n\n\
         USER QUESTION:\n\
         {question}\n\n\
         {OUTPUT_FORMAT}\n\n\
         Now answer the USER QUESTION following the OUTPUT FORMAT exactly.\n",
        history = render_history(history),
        context = render_snippets(chunks),
        question = question.trim(),
    )
}
