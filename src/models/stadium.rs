use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::non_empty;
use crate::error::ValidationError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StadiumInput {
    #[serde(rename = "StadiumID")]
    pub stadium_id: Option<i64>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "State")]
    pub state: Option<String>,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "Capacity")]
    pub capacity: Option<i32>,
    #[serde(rename = "PlayingSurface")]
    pub surface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stadium {
    pub id: Uuid,
    pub upstream_id: i64,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub capacity: Option<i32>,
    pub surface: Option<String>,
}

impl Stadium {
    pub fn same_attributes(&self, other: &Stadium) -> bool {
        self.name == other.name
            && self.city == other.city
            && self.state == other.state
            && self.country == other.country
            && self.capacity == other.capacity
            && self.surface == other.surface
    }
}

impl TryFrom<StadiumInput> for Stadium {
    type Error = ValidationError;

    fn try_from(input: StadiumInput) -> Result<Self, Self::Error> {
        Ok(Stadium {
            id: Uuid::new_v4(),
            upstream_id: input
                .stadium_id
                .ok_or_else(|| ValidationError::missing("stadium", "StadiumID"))?,
            name: non_empty(input.name)
                .ok_or_else(|| ValidationError::missing("stadium", "Name"))?,
            city: non_empty(input.city),
            state: non_empty(input.state),
            country: non_empty(input.country),
            capacity: input.capacity.filter(|c| *c > 0),
            surface: non_empty(input.surface),
        })
    }
}
