//! Meme templates: a fixed catalog compiled into the binary plus ad hoc uploads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A background image with a suggested number of caption slots.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub url: String,
    pub slot_count: u32,
}

impl Template {
    const CUSTOM_SLOTS: u32 = 2;

    /// A template for an image the user brought themselves.
    pub fn custom(name: impl Into<String>, url: impl Into<String>) -> Self {
        Template {
            id: format!("custom-{}", Uuid::new_v4()),
            name: name.into(),
            url: url.into(),
            slot_count: Self::CUSTOM_SLOTS,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.id.starts_with("custom-")
    }
}

// (id, name, url, slots)
const BUILTIN: &[(&str, &str, &str, u32)] = &[
    ("181913649", "Drake Hotline Bling", "https://i.imgflip.com/30b1gx.jpg", 2),
    ("87743020", "Two Buttons", "https://i.imgflip.com/1g8my4.jpg", 3),
    ("112126428", "Distracted Boyfriend", "https://i.imgflip.com/1ur9b0.jpg", 3),
    ("131087935", "Running Away Balloon", "https://i.imgflip.com/261o3j.jpg", 5),
    ("217743513", "UNO Draw 25 Cards", "https://i.imgflip.com/3lmzyx.jpg", 2),
    ("124822590", "Left Exit 12 Off Ramp", "https://i.imgflip.com/22bdq6.jpg", 3),
    ("129242436", "Change My Mind", "https://i.imgflip.com/24y43o.jpg", 2),
    ("438680", "Batman Slapping Robin", "https://i.imgflip.com/9ehk.jpg", 2),
    ("188390779", "Woman Yelling At Cat", "https://i.imgflip.com/345v97.jpg", 2),
    ("61579", "One Does Not Simply", "https://i.imgflip.com/1bij.jpg", 2),
    ("101470", "Ancient Aliens", "https://i.imgflip.com/26am.jpg", 2),
    ("93895088", "Expanding Brain", "https://i.imgflip.com/1jwhww.jpg", 4),
    ("102156234", "Mocking Spongebob", "https://i.imgflip.com/1otk96.jpg", 2),
    ("97984", "Disaster Girl", "https://i.imgflip.com/23ls.jpg", 2),
    ("61520", "Futurama Fry", "https://i.imgflip.com/1bgw.jpg", 2),
];

/// Read-only lookup over the built-in templates.
#[derive(Debug, Clone)]
pub struct Catalog {
    templates: Vec<Template>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|&(id, name, url, slot_count)| Template {
                id: id.to_string(),
                name: name.to_string(),
                url: url.to_string(),
                slot_count,
            })
            .collect();
        Catalog { templates }
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Case-insensitive lookup by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
