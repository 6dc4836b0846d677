use uuid::Uuid;

pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Random id used where ordering must not leak creation time (session tokens, salts).
pub fn new_uuid_v4() -> Uuid {
    Uuid::new_v4()
}
