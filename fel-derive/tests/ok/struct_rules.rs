use fel_derive::Validate;

#[derive(Validate)]
#[validate(non_empty)]
pub struct Login {
    pub user: String,
    pub password: String,
    #[validate(digits)]
    pub code: String,
}

fn main() {
    assert!(Login::new("ventas".into(), "secreto".into(), "1".into()).is_ok());
    assert!(Login::new("  ".into(), "secreto".into(), "1".into()).is_err());
    assert!(Login::new("ventas".into(), "secreto".into(), "uno".into()).is_err());
}
