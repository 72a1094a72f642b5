//! crates/gutachter_core/src/taxonomy.rs
//!
//! The static document structure: which sections and subsections each
//! report topic consists of. This is configuration, not data; the
//! tables are never mutated and section/subsection ids are the keys the
//! rest of the client addresses conversations by.

use crate::domain::Topic;

/// The finest-grained unit of content the user fills in via conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsection {
    pub id: &'static str,
    pub title: &'static str,
}

/// A group of subsections within a topic's report structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub id: &'static str,
    pub title: &'static str,
    pub subsections: &'static [Subsection],
}

const BAUGRUND_SECTIONS: &[Section] = &[
    Section {
        id: "projektdaten",
        title: "Projektdaten",
        subsections: &[
            Subsection { id: "vorhaben", title: "Bauvorhaben" },
            Subsection { id: "auftraggeber", title: "Auftraggeber" },
        ],
    },
    Section {
        id: "standort",
        title: "Standort und Erkundung",
        subsections: &[
            Subsection { id: "lage", title: "Lage und Topographie" },
            Subsection { id: "erkundung", title: "Felduntersuchungen" },
        ],
    },
    Section {
        id: "geologie",
        title: "Geologie",
        subsections: &[
            Subsection { id: "schichtenverzeichnis", title: "Schichtenverzeichnis" },
            Subsection { id: "grundwasser", title: "Grundwasserverhältnisse" },
        ],
    },
    Section {
        id: "bewertung",
        title: "Geotechnische Bewertung",
        subsections: &[
            Subsection { id: "gruendung", title: "Gründungsempfehlung" },
            Subsection { id: "erdarbeiten", title: "Hinweise zu Erdarbeiten" },
        ],
    },
];

const DEKLARATION_SECTIONS: &[Section] = &[
    Section {
        id: "probenahme",
        title: "Probenahme",
        subsections: &[
            Subsection { id: "entnahmestellen", title: "Entnahmestellen" },
            Subsection { id: "verfahren", title: "Probenahmeverfahren" },
        ],
    },
    Section {
        id: "analytik",
        title: "Analytik",
        subsections: &[
            Subsection { id: "parameter", title: "Untersuchte Parameter" },
            Subsection { id: "ergebnisse", title: "Analyseergebnisse" },
        ],
    },
    Section {
        id: "einstufung",
        title: "Abfallrechtliche Einstufung",
        subsections: &[
            Subsection { id: "zuordnung", title: "Zuordnungswerte" },
            Subsection { id: "entsorgung", title: "Entsorgungsempfehlung" },
        ],
    },
];

const VERSICKERUNG_SECTIONS: &[Section] = &[
    Section {
        id: "standort",
        title: "Standort",
        subsections: &[
            Subsection { id: "flaeche", title: "Untersuchte Fläche" },
            Subsection { id: "nutzung", title: "Geplante Nutzung" },
        ],
    },
    Section {
        id: "versickerung",
        title: "Versickerungsfähigkeit",
        subsections: &[
            Subsection { id: "kf-wert", title: "Durchlässigkeitsbeiwert" },
            Subsection { id: "versuche", title: "Versickerungsversuche" },
        ],
    },
    Section {
        id: "empfehlung",
        title: "Empfehlung",
        subsections: &[
            Subsection { id: "anlage", title: "Versickerungsanlage" },
            Subsection { id: "bemessung", title: "Bemessung" },
        ],
    },
];

/// Returns the ordered sections for a topic.
pub fn sections(topic: Topic) -> &'static [Section] {
    match topic {
        Topic::Baugrundgutachten => BAUGRUND_SECTIONS,
        Topic::Deklarationsanalyse => DEKLARATION_SECTIONS,
        Topic::Versickerungsgutachten => VERSICKERUNG_SECTIONS,
    }
}

pub fn find_section(topic: Topic, section_id: &str) -> Option<&'static Section> {
    sections(topic).iter().find(|s| s.id == section_id)
}

pub fn find_subsection(
    topic: Topic,
    section_id: &str,
    subsection_id: &str,
) -> Option<&'static Subsection> {
    find_section(topic, section_id)?
        .subsections
        .iter()
        .find(|s| s.id == subsection_id)
}
