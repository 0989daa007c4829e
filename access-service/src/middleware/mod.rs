mod user;

pub use user::{USER_EMAIL_HEADER, USER_GROUPS_HEADER, USER_ID_HEADER};
