use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::{Requester, User, UserRole};

const PLACEHOLDER_CREDENTIAL_LEN: usize = 16;

/// Public sign-up. Always yields a customer account.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUp {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<SignUp> for NewUser {
    fn from(sign_up: SignUp) -> Self {
        NewUser {
            name: sign_up.name,
            phone: sign_up.phone,
            email: sign_up.email,
            role: UserRole::Customer,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: UserRole,
}

/// Backing identities. Phone numbers are unique.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<Uuid, User>,
    by_phone: DashMap<String, Uuid>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, new: NewUser) -> Result<User, AppError> {
        let name = new.name.trim().to_string();
        let phone = new.phone.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidInput("name cannot be empty".to_string()));
        }
        if phone.is_empty() {
            return Err(AppError::InvalidInput("phone cannot be empty".to_string()));
        }

        match self.by_phone.entry(phone.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "a user with phone {phone} already exists"
            ))),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    name,
                    phone,
                    email: new.email.filter(|email| !email.trim().is_empty()),
                    role: new.role,
                    credential: placeholder_credential(),
                    created_at: Utc::now(),
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    /// Account for a partner created on the fly; the credential must be reset before first login.
    pub fn create_placeholder_account(
        &self,
        name: &str,
        phone: &str,
        email: Option<String>,
    ) -> Result<User, AppError> {
        self.register(NewUser {
            name: name.to_string(),
            phone: phone.to_string(),
            email,
            role: UserRole::DeliveryPartner,
        })
    }

    /// Drops a user and frees its phone number.
    pub fn remove(&self, id: Uuid) -> Option<User> {
        let (_, user) = self.users.remove(&id)?;
        self.by_phone.remove_if(&user.phone, |_, owner| *owner == id);
        Some(user)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<User, AppError> {
        self.users
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))
    }

    pub fn requester(&self, id: Uuid) -> Result<Requester, AppError> {
        let user = self.find_by_id(id)?;
        Ok(Requester {
            user_id: user.id,
            role: user.role,
        })
    }
}

fn placeholder_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PLACEHOLDER_CREDENTIAL_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{NewUser, SignUp, UserDirectory};
    use crate::error::AppError;
    use crate::models::user::UserRole;

    #[test]
    fn phone_numbers_are_unique() {
        let directory = UserDirectory::new();
        directory
            .register(NewUser {
                name: "Asha".to_string(),
                phone: "555-0100".to_string(),
                email: None,
                role: UserRole::Customer,
            })
            .unwrap();

        let err = directory
            .create_placeholder_account("Ravi", "555-0100", None)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn removing_a_user_frees_its_phone() {
        let directory = UserDirectory::new();
        let user = directory
            .create_placeholder_account("Ravi", "555-0142", None)
            .unwrap();

        let removed = directory.remove(user.id).unwrap();
        assert_eq!(removed.id, user.id);
        assert!(matches!(directory.find_by_id(user.id), Err(AppError::NotFound(_))));
        assert!(directory.remove(user.id).is_none());

        directory
            .create_placeholder_account("Ravi", "555-0142", None)
            .unwrap();
    }

    #[test]
    fn sign_up_ignores_any_requested_role() {
        let sign_up: SignUp = serde_json::from_value(serde_json::json!({
            "name": "Mallory",
            "phone": "555-0666",
            "role": "admin"
        }))
        .unwrap();

        let user = UserDirectory::new().register(sign_up.into()).unwrap();
        assert_eq!(user.role, UserRole::Customer);
    }

    #[test]
    fn placeholder_accounts_are_delivery_partners_with_a_credential() {
        let directory = UserDirectory::new();
        let user = directory
            .create_placeholder_account("Ravi", "555-0199", Some("ravi@example.com".to_string()))
            .unwrap();

        assert_eq!(user.role, UserRole::DeliveryPartner);
        assert_eq!(user.credential.len(), 16);
        assert_eq!(directory.requester(user.id).unwrap().role, UserRole::DeliveryPartner);
    }
}
