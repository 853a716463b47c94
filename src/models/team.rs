use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::non_empty;
use crate::error::ValidationError;

/// Team record as returned by `scores/json/Teams`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamInput {
    #[serde(rename = "TeamID")]
    pub team_id: Option<i64>,
    /// Team code, e.g. "ALA"
    #[serde(rename = "Key")]
    pub key: Option<String>,
    #[serde(rename = "School")]
    pub school: Option<String>,
    /// Mascot
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Conference")]
    pub conference: Option<String>,
    #[serde(rename = "Division")]
    pub division: Option<String>,
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "State")]
    pub state: Option<String>,
    #[serde(rename = "TalentComposite")]
    pub talent_composite: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub upstream_id: i64,
    pub code: String,
    pub school_name: String,
    pub mascot: Option<String>,
    pub conference: Option<String>,
    pub division: Option<String>,
    /// Composite recruiting strength rating
    pub talent_composite: Option<f64>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl Team {
    /// True when every field the provider owns matches `other`.
    pub fn same_attributes(&self, other: &Team) -> bool {
        self.code == other.code
            && self.school_name == other.school_name
            && self.mascot == other.mascot
            && self.conference == other.conference
            && self.division == other.division
            && self.talent_composite == other.talent_composite
            && self.city == other.city
            && self.state == other.state
    }
}

impl TryFrom<TeamInput> for Team {
    type Error = ValidationError;

    fn try_from(input: TeamInput) -> Result<Self, Self::Error> {
        let upstream_id = input
            .team_id
            .ok_or_else(|| ValidationError::missing("team", "TeamID"))?;
        let code = non_empty(input.key)
            .ok_or_else(|| ValidationError::missing("team", "Key"))?
            .to_uppercase();
        let school_name =
            non_empty(input.school).ok_or_else(|| ValidationError::missing("team", "School"))?;

        Ok(Team {
            id: Uuid::new_v4(),
            upstream_id,
            code,
            school_name,
            mascot: non_empty(input.name),
            conference: non_empty(input.conference),
            division: non_empty(input.division),
            talent_composite: input.talent_composite,
            city: non_empty(input.city),
            state: non_empty(input.state),
        })
    }
}
