/// Host serving the flag icons.
pub const FLAG_CDN: &str = "https://flagcdn.com";

/// Image sources for one country flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagImage {
    pub country_code: String,
    pub src: String,
    pub srcset: String,
}

impl FlagImage {
    pub fn new(country_code: &str) -> Self {
        let code = country_code.to_ascii_lowercase();
        let src = format!("{FLAG_CDN}/20x15/{code}.png");
        let srcset = format!("{FLAG_CDN}/40x30/{code}.png 2x, {FLAG_CDN}/60x45/{code}.png 3x");
        Self {
            country_code: code,
            src,
            srcset,
        }
    }
}
