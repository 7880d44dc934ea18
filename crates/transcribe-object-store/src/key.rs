use chrono::Utc;
use uuid::Uuid;

/// Builds an object key under the owning user's required prefix
/// (`users/{user_id}/...`), the same shape `JobRepository::enqueue` and the
/// worker's validation both expect.
pub fn generate_object_key(user_id: Uuid, filename: &str, prefix: &str) -> String {
    let now = Utc::now();
    let year = now.format("%Y");
    let month = now.format("%m");

    let safe_filename: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();

    let unique_id = Uuid::new_v4().simple().to_string()[..8].to_string();

    format!("users/{user_id}/{prefix}/{year}/{month}/{unique_id}_{safe_filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        let user_id = Uuid::new_v4();
        let key = generate_object_key(user_id, "my file!@#.mp3", "media");

        assert!(key.starts_with(&format!("users/{user_id}/media/")));
        assert!(key.ends_with("my_file___.mp3"));
        assert!(!key.contains('!'));
        assert!(!key.contains(' '));
    }
}
