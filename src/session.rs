/// Session key under which the auth layer stores the signed-in user's id.
pub const USER_ID: &str = "user_id";
pub const RETURN_URL: &str = "return_url";
