use chrono::{DateTime, Utc};
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type BookId = i32;

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Catalog entry of a single title, quantity is the number of copies on the shelf
pub struct Book {
    pub id: BookId,
    pub name: String,
    pub author: String,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Payload used to add a title to the catalog
pub struct NewBook {
    pub name: String,
    pub author: String,
    /// Number of copies, defaults to a single one
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

impl NewBook {
    /// Trims name and author and checks that the entry can be stored
    pub fn normalized(self) -> Result<Self, String> {
        let name = self.name.trim().to_string();
        let author = self.author.trim().to_string();
        if name.is_empty() {
            return Err("Book name must not be empty".to_string());
        }
        if author.is_empty() {
            return Err("Book author must not be empty".to_string());
        }
        if self.quantity < 0 {
            return Err(format!("Quantity {} must not be negative", self.quantity));
        }
        Ok(Self {
            name,
            author,
            quantity: self.quantity,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct GetBooksResponse {
    pub books: Vec<Book>,
}
