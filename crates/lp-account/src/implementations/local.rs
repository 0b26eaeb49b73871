//! Local key account.
//!
//! The key is either given directly as a hex private key or unlocked from an
//! encrypted JSON keystore with a passphrase.

use crate::{AccountError, AccountFactory, AccountInterface};
use alloy::primitives::{Address, Bytes};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use lp_types::{ConfigSchema, Field, FieldType, Schema, SecretString, ValidationError};
use std::path::Path;
use std::sync::Arc;

pub struct LocalWallet {
	signer: Arc<PrivateKeySigner>,
}

impl LocalWallet {
	pub fn from_private_key(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key.with_exposed(|key| {
			key.parse::<PrivateKeySigner>()
				.map_err(|e| AccountError::InvalidKey(e.to_string()))
		})?;
		Ok(Self {
			signer: Arc::new(signer),
		})
	}

	pub fn from_keystore(path: &Path, password: &SecretString) -> Result<Self, AccountError> {
		let signer = password.with_exposed(|password| {
			PrivateKeySigner::decrypt_keystore(path, password).map_err(|e| {
				AccountError::Keystore(format!("{}: {}", path.display(), e))
			})
		})?;
		Ok(Self {
			signer: Arc::new(signer),
		})
	}
}

pub struct LocalWalletSchema;

impl LocalWalletSchema {
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		LocalWalletSchema.validate(config)
	}
}

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("private_key", FieldType::String).with_validator(|value| {
					let key = value.as_str().unwrap_or_default();
					let digits = key.strip_prefix("0x").unwrap_or(key);
					if digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
						Ok(())
					} else {
						Err("private key must be 32 bytes of hex".to_string())
					}
				}),
				Field::new("keystore_path", FieldType::String),
				Field::new("password", FieldType::String),
			],
		);
		schema.validate(config)?;

		let has_key = config.get("private_key").is_some();
		let has_keystore = config.get("keystore_path").is_some();
		match (has_key, has_keystore) {
			(true, true) => Err(ValidationError::InvalidValue {
				field: "private_key".to_string(),
				message: "private_key and keystore_path are mutually exclusive".to_string(),
			}),
			(false, false) => Err(ValidationError::MissingField(
				"private_key or keystore_path".to_string(),
			)),
			(false, true) if config.get("password").is_none() => {
				Err(ValidationError::MissingField("password".to_string()))
			},
			_ => Ok(()),
		}
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	fn address(&self) -> Address {
		self.signer.address()
	}

	async fn sign_message(&self, message: &[u8]) -> Result<Bytes, AccountError> {
		let signature = self
			.signer
			.sign_message(message)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(Bytes::copy_from_slice(&signature.as_bytes()))
	}

	fn transaction_signer(&self) -> Arc<PrivateKeySigner> {
		Arc::clone(&self.signer)
	}
}

/// Builds a local account from its config table.
///
/// Accepts either `private_key`, or `keystore_path` together with `password`.
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema::validate_config(config)
		.map_err(|e| AccountError::InvalidConfig(e.to_string()))?;

	let secret = |name: &str| {
		config
			.get(name)
			.and_then(|v| v.as_str())
			.map(SecretString::from)
	};

	let wallet = match (secret("private_key"), config.get("keystore_path")) {
		(Some(key), _) => LocalWallet::from_private_key(&key)?,
		(None, Some(path)) => {
			let path = path.as_str().unwrap_or_default();
			let password = secret("password")
				.ok_or_else(|| AccountError::InvalidConfig("password is required".to_string()))?;
			LocalWallet::from_keystore(Path::new(path), &password)?
		},
		(None, None) => {
			return Err(AccountError::InvalidConfig(
				"private_key or keystore_path is required".to_string(),
			))
		},
	};

	tracing::info!(address = %wallet.address(), "Loaded local account");
	Ok(Box::new(wallet))
}

pub struct Registry;

impl lp_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}
