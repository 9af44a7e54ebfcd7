use fel_derive::Validate;

#[derive(Debug)]
pub struct BadConfig(String);

impl From<String> for BadConfig {
    fn from(message: String) -> Self {
        BadConfig(message)
    }
}

#[derive(Validate)]
#[validate_error(BadConfig)]
#[validate(non_empty)]
pub struct Endpoint {
    pub url: String,
}

fn main() {
    let err = Endpoint::new(" ".into()).err().expect("empty url rejected");
    assert_eq!(err.0, "url must be non-empty");
}
