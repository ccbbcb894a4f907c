// CV analysis: upload, text extraction, the stored record and its derived
// artifacts (summary options, cover letter, interview pack).

pub mod extract;
pub mod handlers;
pub mod store;
