//! Composable building blocks for the service layer.
//!
//! `QueryReader` wraps a database operation so services can assemble
//! multi-step flows without threading the connection through every call;
//! `Validator` collects field rules for the model DTOs. The discovery
//! pipeline is sequential, so there are no parallel or retrying
//! combinators here.

use crate::{
    config::db::Pool,
    error::{ServiceError, ServiceResult},
};
use diesel::{Connection, PgConnection};
use std::marker::PhantomData;
use std::sync::Mutex;

/// A database operation awaiting a connection (reader-monad style).
pub struct QueryReader<T> {
    run: Box<dyn Fn(&mut PgConnection) -> ServiceResult<T> + Send + Sync>,
}

impl<T> QueryReader<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut PgConnection) -> ServiceResult<T> + Send + Sync + 'static,
    {
        Self { run: Box::new(f) }
    }

    pub fn run(&self, conn: &mut PgConnection) -> ServiceResult<T> {
        (self.run)(conn)
    }

    /// Map the result to a new type.
    pub fn map<U, F>(self, f: F) -> QueryReader<U>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
        T: 'static,
    {
        QueryReader::new(move |conn| self.run(conn).map(&f))
    }

    /// Chain a second operation that depends on the first result.
    pub fn and_then<U, F>(self, f: F) -> QueryReader<U>
    where
        F: Fn(T) -> QueryReader<U> + Send + Sync + 'static,
        T: 'static,
    {
        QueryReader::new(move |conn| {
            let result = self.run(conn)?;
            f(result).run(conn)
        })
    }

    /// Execute the whole reader inside a database transaction.
    ///
    /// The inner business error is preserved across the rollback instead
    /// of being replaced by diesel's rollback marker.
    pub fn transaction(self) -> QueryReader<T>
    where
        T: 'static,
    {
        QueryReader::new(move |conn| {
            let falha: Mutex<Option<ServiceError>> = Mutex::new(None);
            let resultado = conn.transaction::<T, diesel::result::Error, _>(|conn| {
                self.run(conn).map_err(|e| {
                    log::error!("Transaction operation failed, rolling back: {}", e);
                    *falha.lock().expect("error slot poisoned") = Some(e);
                    diesel::result::Error::RollbackTransaction
                })
            });
            match resultado {
                Ok(valor) => Ok(valor),
                Err(e) => Err(falha
                    .lock()
                    .expect("error slot poisoned")
                    .take()
                    .unwrap_or_else(|| {
                        ServiceError::internal_server_error(format!("Transaction failed: {}", e))
                    })),
            }
        })
    }
}

/// Execute a `QueryReader` against a pooled connection.
pub fn run_query<T>(reader: QueryReader<T>, pool: &Pool) -> ServiceResult<T> {
    pool.get()
        .map_err(|e| {
            ServiceError::internal_server_error(format!("Failed to get database connection: {}", e))
        })
        .and_then(|mut conn| reader.run(&mut conn))
}

/// Rule-based validation combinator for model DTOs.
pub struct Validator<T> {
    rules: Vec<Box<dyn Fn(&T) -> ServiceResult<()> + Send + Sync>>,
    _phantom: PhantomData<T>,
}

impl<T> Validator<T> {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            _phantom: PhantomData,
        }
    }

    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&T) -> ServiceResult<()> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    /// Run every rule; the first failure wins.
    pub fn validate(&self, input: &T) -> ServiceResult<()> {
        for rule in &self.rules {
            rule(input)?;
        }
        Ok(())
    }
}

impl<T> Default for Validator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared validation rules for the fiscal-document domain.
pub mod validation_rules {
    use super::{ServiceError, ServiceResult};
    use regex::Regex;

    pub fn required(field_name: &'static str) -> impl Fn(&String) -> ServiceResult<()> {
        move |value: &String| {
            if value.trim().is_empty() {
                Err(ServiceError::bad_request(format!(
                    "{} is required",
                    field_name
                )))
            } else {
                Ok(())
            }
        }
    }

    pub fn min_length(
        field_name: &'static str,
        min: usize,
    ) -> impl Fn(&String) -> ServiceResult<()> {
        move |value: &String| {
            if value.chars().count() < min {
                Err(ServiceError::bad_request(format!(
                    "{} must be at least {} characters long",
                    field_name, min
                )))
            } else {
                Ok(())
            }
        }
    }

    pub fn max_length(
        field_name: &'static str,
        max: usize,
    ) -> impl Fn(&String) -> ServiceResult<()> {
        move |value: &String| {
            if value.chars().count() > max {
                Err(ServiceError::bad_request(format!(
                    "{} must be no more than {} characters long",
                    field_name, max
                )))
            } else {
                Ok(())
            }
        }
    }

    pub fn range<T>(field_name: &'static str, min: T, max: T) -> impl Fn(&T) -> ServiceResult<()>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        move |value: &T| {
            if *value < min || *value > max {
                Err(ServiceError::bad_request(format!(
                    "{} must be between {} and {}",
                    field_name, min, max
                )))
            } else {
                Ok(())
            }
        }
    }

    /// Validate against a regex pattern; compiled patterns are cached.
    pub fn pattern(
        field_name: &'static str,
        pattern: &'static str,
    ) -> impl Fn(&String) -> ServiceResult<()> {
        use std::collections::HashMap;
        use std::sync::{OnceLock, RwLock};

        move |value: &String| {
            static REGEX_CACHE: OnceLock<RwLock<HashMap<&'static str, Regex>>> = OnceLock::new();

            let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
            let casa = {
                let lido = cache.read().expect("regex cache poisoned");
                match lido.get(pattern) {
                    Some(regex) => regex.is_match(value),
                    None => {
                        drop(lido);
                        let mut escrita = cache.write().expect("regex cache poisoned");
                        escrita
                            .entry(pattern)
                            .or_insert_with(|| Regex::new(pattern).expect("invalid regex pattern"))
                            .is_match(value)
                    }
                }
            };

            if casa {
                Ok(())
            } else {
                Err(ServiceError::bad_request(format!(
                    "{} format is invalid",
                    field_name
                )))
            }
        }
    }

    /// Exactly 14 digits, no mask characters.
    pub fn cnpj_digits(field_name: &'static str) -> impl Fn(&String) -> ServiceResult<()> {
        pattern(field_name, r"^\d{14}$")
    }

    /// Two-letter state code.
    pub fn uf(field_name: &'static str) -> impl Fn(&String) -> ServiceResult<()> {
        pattern(field_name, r"^[A-Za-z]{2}$")
    }

    /// 44-digit fiscal access key.
    pub fn chave_acesso(field_name: &'static str) -> impl Fn(&String) -> ServiceResult<()> {
        pattern(field_name, r"^\d{44}$")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_stops_at_first_failure() {
        let validator = Validator::<i32>::new()
            .rule(|&x| {
                if x > 0 {
                    Ok(())
                } else {
                    Err(ServiceError::bad_request("must be positive"))
                }
            })
            .rule(|&x| {
                if x < 100 {
                    Ok(())
                } else {
                    Err(ServiceError::bad_request("must be less than 100"))
                }
            });

        assert!(validator.validate(&50).is_ok());
        assert_eq!(
            validator.validate(&-1).unwrap_err().message(),
            "must be positive"
        );
        assert!(validator.validate(&101).is_err());
    }

    #[test]
    fn cnpj_rule_rejects_masks_and_short_values() {
        let rule = validation_rules::cnpj_digits("cnpj");
        assert!(rule(&"12345678000190".to_string()).is_ok());
        assert!(rule(&"12.345.678/0001-90".to_string()).is_err());
        assert!(rule(&"123".to_string()).is_err());
    }

    #[test]
    fn chave_rule_requires_44_digits() {
        let rule = validation_rules::chave_acesso("chave");
        assert!(rule(&"5".repeat(44)).is_ok());
        assert!(rule(&"5".repeat(43)).is_err());
        assert!(rule(&format!("{}x", "5".repeat(43))).is_err());
    }
}
