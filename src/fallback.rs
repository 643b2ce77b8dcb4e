//! Canned answers used when the completion service is unavailable.

/// Returned when no table entry matches.
pub const UNAVAILABLE_ANSWER: &str =
    "Извините, сейчас я не могу ответить на этот вопрос. Попробуйте позже.";

/// Known question fragments and their answers. First match wins, so order matters.
const CANNED_ANSWERS: &[(&str, &str)] = &[
    ("capital of russia", "Столица России - Москва."),
    ("столица россии", "Столица России - Москва."),
    ("capital of france", "Столица Франции - Париж."),
    ("столица франции", "Столица Франции - Париж."),
    ("2+2", "2 + 2 = 4."),
    ("2 + 2", "2 + 2 = 4."),
    ("how are you", "Всё отлично, спасибо! Задайте вопрос, и я опубликую ответ в канале."),
    ("как дела", "Всё отлично, спасибо! Задайте вопрос, и я опубликую ответ в канале."),
    ("who are you", "Я бот, который отвечает на вопросы и публикует ответы в канале."),
    ("кто ты", "Я бот, который отвечает на вопросы и публикует ответы в канале."),
];

/// Lowercase, trim, and drop trailing punctuation.
pub fn normalize(question: &str) -> String {
    question
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '…' | '¿' | '¡'))
        .trim_end()
        .to_lowercase()
}

pub fn answer(question: &str) -> &'static str {
    let normalized = normalize(question);
    CANNED_ANSWERS
        .iter()
        .find(|(key, _)| normalized.contains(key))
        .map(|(_, answer)| *answer)
        .unwrap_or(UNAVAILABLE_ANSWER)
}
