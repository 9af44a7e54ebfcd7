use fel_derive::Validate;

#[derive(Validate)]
pub struct Taxpayer {
    pub name: String,
    #[validate(nit)]
    pub nit: String,
}

fn main() {
    assert!(Taxpayer::new("Tienda".into(), "1234567-8".into()).is_ok());
    assert!(Taxpayer::new("Tienda".into(), "576937K".into()).is_ok());
    assert!(Taxpayer::new("Tienda".into(), "1234 567".into()).is_ok());
    assert!(Taxpayer::new("Tienda".into(), " 1234 567-8\t".into()).is_ok());
    assert!(Taxpayer::new("Tienda".into(), "12A4".into()).is_err());
    assert!(Taxpayer::new("Tienda".into(), " - ".into()).is_err());
    assert!(Taxpayer::new("Tienda".into(), "".into()).is_err());
}
