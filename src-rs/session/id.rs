use rand::{distributions::Alphanumeric, Rng};

/// Correlation id for one dispatch call, carried through the structured
/// event log.
pub fn generate_request_id() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let random_part: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    format!("req_{}_{}", timestamp, random_part.to_lowercase())
}
