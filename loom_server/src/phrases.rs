//! Client-facing texts in the language chosen in the settings.
//!
//! Phrases are keyed by their English text. A phrase missing from a table
//! comes out in English.

use tracing::warn;

pub const DEFAULT_LANGUAGE: &str = "English";

type Table = &'static [(&'static str, &'static str)];

const FRANCAIS: Table = &[
    ("at the start of threading", "au début de l'enfilage"),
    ("at the start of weaving", "au début du tissage"),
    ("cannot jump to a pick", "impossible d'aller à une duite"),
    ("cannot jump to an end", "impossible d'aller à un fil"),
    ("cannot read pattern names", "impossible de lire les noms de motifs"),
    ("could not save", "impossible d'enregistrer"),
    ("could not save progress", "impossible d'enregistrer la progression"),
    ("invalid end number", "numéro de fil invalide"),
    ("invalid pick number", "numéro de duite invalide"),
    ("language is empty", "la langue est vide"),
    ("loom name is empty", "le nom du métier est vide"),
    (
        "loom reports a different number of shafts",
        "le métier signale un autre nombre de cadres",
    ),
    ("loom write failed", "échec d'écriture vers le métier"),
    (
        "no direction to change in settings mode",
        "aucune direction à changer en mode réglages",
    ),
    ("no pattern", "aucun motif"),
    ("no such pattern", "motif introuvable"),
    (
        "out-of-band commands need the mock loom",
        "les commandes hors bande nécessitent le métier simulé",
    ),
    ("pattern name is empty", "le nom du motif est vide"),
    (
        "replaced pattern; its progress was reset",
        "motif remplacé ; sa progression a été remise à zéro",
    ),
    (
        "thread group size must be positive",
        "la taille du groupe de fils doit être positive",
    ),
    ("unknown language", "langue inconnue"),
    ("unknown out-of-band command", "commande hors bande inconnue"),
    (
        "weaving direction is controlled by the loom",
        "la direction de tissage est contrôlée par le métier",
    ),
];

static LANGUAGES: &[(&str, Table)] = &[(DEFAULT_LANGUAGE, &[]), ("Français", FRANCAIS)];

#[derive(Debug, Clone, Copy)]
pub struct Phrasebook {
    table: Table,
}

impl Default for Phrasebook {
    fn default() -> Self {
        Self { table: &[] }
    }
}

impl Phrasebook {
    /// `None` for a language with no table.
    pub fn lookup(language: &str) -> Option<Self> {
        LANGUAGES
            .iter()
            .find(|(name, _)| *name == language)
            .map(|(_, table)| Self { table: *table })
    }

    /// Like [`Phrasebook::lookup`], falling back to English.
    pub fn for_language(language: &str) -> Self {
        Self::lookup(language).unwrap_or_else(|| {
            warn!(language, "no translations for language; using English");
            Self::default()
        })
    }

    pub fn t(&self, phrase: &'static str) -> &'static str {
        self.table
            .iter()
            .find(|(english, _)| *english == phrase)
            .map_or(phrase, |(_, translated)| *translated)
    }
}

pub fn languages() -> impl Iterator<Item = &'static str> {
    LANGUAGES.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_is_the_phrase_itself() {
        let en = Phrasebook::lookup(DEFAULT_LANGUAGE).unwrap();
        assert_eq!(en.t("no pattern"), "no pattern");
    }

    #[test]
    fn translated_and_missing_phrases() {
        let fr = Phrasebook::lookup("Français").unwrap();
        assert_eq!(fr.t("no pattern"), "aucun motif");
        assert_eq!(fr.t("not in any table"), "not in any table");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert!(Phrasebook::lookup("Klingon").is_none());
        let book = Phrasebook::for_language("Klingon");
        assert_eq!(book.t("no pattern"), "no pattern");
        assert_eq!(languages().collect::<Vec<_>>(), vec!["English", "Français"]);
    }

    #[test]
    fn tables_are_sorted_without_duplicates() {
        for (name, table) in LANGUAGES {
            for pair in table.windows(2) {
                assert!(pair[0].0 < pair[1].0, "{name}: {:?} out of order", pair[1].0);
            }
        }
    }
}
