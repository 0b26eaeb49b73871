//! Validation of raw TOML implementation configs.
//!
//! Pluggable implementations (accounts, chain gateways) receive their section
//! of the configuration as an untyped `toml::Value`. Each one describes the
//! shape it expects with a [`Schema`] and validates before construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

#[derive(Debug)]
pub enum FieldType {
	String,
	/// A URL whose scheme is one of the listed ones.
	Url(&'static [&'static str]),
}

/// Extra check run after the type check passes.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of one TOML table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn mismatch(field: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn invalid(field: &str, message: String) -> ValidationError {
	ValidationError::InvalidValue {
		field: field.to_string(),
		message,
	}
}

fn check_type(field: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			value.as_str().ok_or_else(|| mismatch(field, "string", value))?;
		},
		FieldType::Url(schemes) => {
			let s = value.as_str().ok_or_else(|| mismatch(field, "url", value))?;
			let accepted = schemes
				.iter()
				.any(|scheme| s.starts_with(&format!("{}://", scheme)));
			if !accepted {
				return Err(invalid(
					field,
					format!("URL must use one of the schemes {:?}", schemes),
				));
			}
		},
	}

	Ok(())
}

/// Implemented by every pluggable implementation to describe its config.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(s: &str) -> toml::Value {
		toml::from_str(s).unwrap()
	}

	#[test]
	fn test_required_field_missing() {
		let schema = Schema::new(vec![Field::new("rpc_url", FieldType::String)], vec![]);
		let err = schema.validate(&parse("other = 1")).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "rpc_url"));
	}

	#[test]
	fn test_url_scheme() {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::Url(&["ws", "wss"]))],
			vec![],
		);
		assert!(schema.validate(&parse("rpc_url = \"ws://localhost:8546\"")).is_ok());
		assert!(schema
			.validate(&parse("rpc_url = \"http://localhost:8545\""))
			.is_err());
	}

	#[test]
	fn test_type_mismatch_names_field() {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::Url(&["ws", "wss"]))],
			vec![],
		);
		let err = schema.validate(&parse("rpc_url = 8546")).unwrap_err();
		assert!(matches!(
			err,
			ValidationError::TypeMismatch { ref field, ref expected, .. }
				if field == "rpc_url" && expected == "url"
		));
	}

	#[test]
	fn test_custom_validator() {
		let schema = Schema::new(
			vec![],
			vec![Field::new("password", FieldType::String).with_validator(|v| {
				if v.as_str().is_some_and(|s| s.is_empty()) {
					Err("must not be empty".to_string())
				} else {
					Ok(())
				}
			})],
		);
		assert!(schema.validate(&parse("password = \"\"")).is_err());
		assert!(schema.validate(&parse("")).is_ok());
	}
}
