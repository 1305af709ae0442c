use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub manager_id: Option<i64>,
}

/// An in-memory list of users with their reporting lines.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<UserRecord>,
}

impl UserDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        UserDirectory { users }
    }

    /// Loads a JSON array of user records.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(UserDirectory::new)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users whose manager is `manager_id`, in directory order.
    pub fn subordinates(&self, manager_id: i64) -> Vec<&UserRecord> {
        self.users
            .iter()
            .filter(|user| user.manager_id == Some(manager_id))
            .collect()
    }
}
