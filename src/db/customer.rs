//! Customer lookup for linking conversations to CRM records

use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A CRM customer (read-mostly from this service)
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Customer repository
#[derive(Debug, Clone)]
pub struct CustomerRepo {
    pool: DbPool,
}

impl CustomerRepo {
    /// Create a new customer repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a customer
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, name: &str, phone: Option<&str>, email: Option<&str>) -> Result<Customer> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO customers (id, name, phone, email) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, phone, email],
        )?;

        Ok(Customer {
            id,
            name: name.to_string(),
            phone: phone.map(String::from),
            email: email.map(String::from),
        })
    }

    /// Find the first customer whose stored phone ends with `suffix`
    ///
    /// Stored phones are free-form, so separators are stripped before matching.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_phone_suffix(&self, suffix: &str) -> Result<Option<Customer>> {
        if suffix.is_empty() {
            return Ok(None);
        }

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let customer = conn
            .query_row(
                "SELECT id, name, phone, email FROM customers
                 WHERE replace(replace(replace(replace(replace(replace(
                         phone, ' ', ''), '-', ''), '+', ''), '(', ''), ')', ''), '.', '')
                       LIKE '%' || ?1
                 ORDER BY created_at ASC
                 LIMIT 1",
                [suffix],
                |row| {
                    Ok(Customer {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        phone: row.get(2)?,
                        email: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(customer)
    }
}
