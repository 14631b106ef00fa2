//! Location text → ISO-3166 alpha-2 country code.

use std::collections::HashMap;

const DEFAULT_COUNTRIES: &[(&str, &str)] = &[
    ("afghanistan", "af"),
    ("albania", "al"),
    ("algeria", "dz"),
    ("argentina", "ar"),
    ("armenia", "am"),
    ("australia", "au"),
    ("austria", "at"),
    ("azerbaijan", "az"),
    ("bangladesh", "bd"),
    ("belarus", "by"),
    ("belgium", "be"),
    ("bolivia", "bo"),
    ("brazil", "br"),
    ("bulgaria", "bg"),
    ("cambodia", "kh"),
    ("cameroon", "cm"),
    ("canada", "ca"),
    ("chile", "cl"),
    ("china", "cn"),
    ("colombia", "co"),
    ("costa rica", "cr"),
    ("croatia", "hr"),
    ("cuba", "cu"),
    ("cyprus", "cy"),
    ("czech republic", "cz"),
    ("czechia", "cz"),
    ("denmark", "dk"),
    ("dominican republic", "do"),
    ("ecuador", "ec"),
    ("egypt", "eg"),
    ("estonia", "ee"),
    ("ethiopia", "et"),
    ("finland", "fi"),
    ("france", "fr"),
    ("georgia", "ge"),
    ("germany", "de"),
    ("ghana", "gh"),
    ("greece", "gr"),
    ("guatemala", "gt"),
    ("hong kong", "hk"),
    ("hungary", "hu"),
    ("iceland", "is"),
    ("india", "in"),
    ("indonesia", "id"),
    ("iran", "ir"),
    ("iraq", "iq"),
    ("ireland", "ie"),
    ("israel", "il"),
    ("italy", "it"),
    ("jamaica", "jm"),
    ("japan", "jp"),
    ("jordan", "jo"),
    ("kazakhstan", "kz"),
    ("kenya", "ke"),
    ("kuwait", "kw"),
    ("latvia", "lv"),
    ("lebanon", "lb"),
    ("lithuania", "lt"),
    ("luxembourg", "lu"),
    ("malaysia", "my"),
    ("mexico", "mx"),
    ("morocco", "ma"),
    ("nepal", "np"),
    ("netherlands", "nl"),
    ("new zealand", "nz"),
    ("nigeria", "ng"),
    ("north korea", "kp"),
    ("norway", "no"),
    ("pakistan", "pk"),
    ("panama", "pa"),
    ("paraguay", "py"),
    ("peru", "pe"),
    ("philippines", "ph"),
    ("poland", "pl"),
    ("portugal", "pt"),
    ("qatar", "qa"),
    ("romania", "ro"),
    ("russia", "ru"),
    ("russian federation", "ru"),
    ("saudi arabia", "sa"),
    ("serbia", "rs"),
    ("singapore", "sg"),
    ("slovakia", "sk"),
    ("slovenia", "si"),
    ("south africa", "za"),
    ("south korea", "kr"),
    ("korea", "kr"),
    ("spain", "es"),
    ("sri lanka", "lk"),
    ("sweden", "se"),
    ("switzerland", "ch"),
    ("taiwan", "tw"),
    ("thailand", "th"),
    ("tunisia", "tn"),
    ("turkey", "tr"),
    ("türkiye", "tr"),
    ("ukraine", "ua"),
    ("united arab emirates", "ae"),
    ("uae", "ae"),
    ("united kingdom", "gb"),
    ("uk", "gb"),
    ("england", "gb"),
    ("scotland", "gb"),
    ("wales", "gb"),
    ("united states", "us"),
    ("united states of america", "us"),
    ("usa", "us"),
    ("uruguay", "uy"),
    ("uzbekistan", "uz"),
    ("venezuela", "ve"),
    ("vietnam", "vn"),
    ("viet nam", "vn"),
];

/// Lookup table from normalized country names to lowercase alpha-2 codes.
#[derive(Debug, Clone)]
pub struct CountryTable {
    names: HashMap<String, String>,
}

impl Default for CountryTable {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_COUNTRIES.iter().copied())
    }
}

impl CountryTable {
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let names = pairs
            .into_iter()
            .map(|(name, code)| (normalize(name), code.to_ascii_lowercase()))
            .collect();
        Self { names }
    }

    /// Resolve free-form location text such as `"Paris, France"`.
    ///
    /// The whole text is tried first, then each comma-separated segment from
    /// the last (most general) to the first.
    pub fn code_for(&self, location: &str) -> Option<&str> {
        let whole = normalize(location);
        if whole.is_empty() {
            return None;
        }
        if let Some(code) = self.names.get(&whole) {
            return Some(code.as_str());
        }
        location
            .rsplit(',')
            .map(normalize)
            .filter(|segment| !segment.is_empty())
            .find_map(|segment| self.names.get(&segment))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '.' || c == '!')
        .to_lowercase()
}
