/// Hidden system prompt sent ahead of the history on every request.
pub fn build_system_prompt(subject_name: &str, resume_context: &str) -> String {
    format!(
        "You are a helpful assistant representing {subject_name}. \
         Answer questions based strictly on this resume context:\n\n\
         {resume_context}\n\n\
         If the answer is not in the resume, say you don't know but offer to contact \
         {subject_name} directly."
    )
}
