//! Turns a transcript plus the user's notes and slide images into the chat
//! prompt for summarization, and resolves image placeholders in the reply.

use crate::error::PipelineError;
use crate::models::ChatCompletion;
use crate::transcript::TranscriptSegment;

/// Contract the lecture summarizer is held to. The marker tags here must
/// stay in sync with [`assemble_prompt`].
pub const SYSTEM_PROMPT: &str = "\
Ты ассистент, который создает конспект по сообщениям пользователя.
Не добавляй своих мыслей, используй только информацию, которая есть в исходном тексте.
Не добавляй в начало конспекта фразы, которые не относят к конспекту.
Пиши конспект в формате markdown.

В первом сообщении будут пожелания пользователя к конспекту.
Во втором сообщении будет текст пользователя.

В тексте могут встречаться заметки пользователя: <заметка>текст</заметка>
В тексте могут встречаться изображения <изображение>Название изображения : описание изображения</изображение>

Если хочешь вставить изображение в конспект пиши как в markdown: ![](Название изображения)
Название изображения указывать только в круглых скобочках - это путь к файлу.
";

/// A note the user attached to the lecture at a given moment.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedNote {
    pub timestamp_secs: f64,
    pub text: String,
}

/// A slide image the summarizer may embed. `name` is the placeholder the
/// model writes; `file_key` is what that placeholder resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideImage {
    pub name: String,
    pub caption: String,
    pub timestamp_secs: f64,
    pub file_key: String,
}

/// Merge segments, notes, and images into a single timestamp-ordered text.
/// Notes and images landing on a segment's start time precede that segment.
/// Also returns the placeholder mapping for [`apply_image_map`].
pub fn assemble_prompt(
    segments: &[TranscriptSegment],
    notes: &[TimedNote],
    images: &[SlideImage],
) -> (String, Vec<(String, String)>) {
    // Lower rank wins on timestamp ties.
    let mut events: Vec<(f64, u8, String)> = Vec::new();
    for note in notes {
        events.push((
            note.timestamp_secs,
            0,
            format!("<заметка>{}</заметка>", note.text.trim()),
        ));
    }
    for image in images {
        events.push((
            image.timestamp_secs,
            1,
            format!(
                "<изображение>{} : {}</изображение>",
                image.name,
                image.caption.trim()
            ),
        ));
    }
    for segment in segments {
        events.push((segment.start, 2, segment.text.trim().to_owned()));
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let content = events
        .into_iter()
        .map(|(_, _, line)| line)
        .collect::<Vec<_>>()
        .join("\n");
    let mapping = images
        .iter()
        .map(|image| (image.name.clone(), image.file_key.clone()))
        .collect();
    (content, mapping)
}

/// Replace every image placeholder in the generated markdown with the stored
/// file key it stands for.
pub fn apply_image_map(markdown: &str, mapping: &[(String, String)]) -> String {
    let mut resolved = markdown.to_owned();
    for (name, file_key) in mapping {
        resolved = resolved.replace(name.as_str(), file_key.as_str());
    }
    resolved
}

/// Full summarization round: assemble the content prompt, call the model,
/// resolve placeholders.
pub async fn compose_summary(
    chat: &dyn ChatCompletion,
    user_prompt: &str,
    segments: &[TranscriptSegment],
    notes: &[TimedNote],
    images: &[SlideImage],
) -> Result<String, PipelineError> {
    let (content_prompt, mapping) = assemble_prompt(segments, notes, images);
    let markdown = chat
        .complete(SYSTEM_PROMPT, user_prompt, &content_prompt)
        .await?;
    Ok(apply_image_map(&markdown, &mapping))
}
