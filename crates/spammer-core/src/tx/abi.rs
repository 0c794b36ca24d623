//! Call data encoding from a JSON ABI.
//!
//! Arguments arrive as strings (after template substitution) and are coerced
//! to the parameter types the ABI declares. Overloaded methods are told apart
//! by their argument count.

use super::BuilderError;
use alloy_dyn_abi::{DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use std::path::Path;

/// Encodes method calls for the call workload.
pub trait CallEncoder: Send + Sync {
	/// Encodes a call to `method` with string arguments.
	fn encode_call(&self, method: &str, args: &[String]) -> Result<Bytes, BuilderError>;

	/// Returns true if the encoder knows `method`.
	fn has_method(&self, method: &str) -> bool;
}

/// [`CallEncoder`] backed by a parsed JSON ABI.
#[derive(Debug, Clone)]
pub struct JsonAbiEncoder {
	abi: JsonAbi,
}

impl JsonAbiEncoder {
	/// Parses an ABI array, or a compiler artifact holding one under `abi`.
	pub fn from_json(json: &str) -> Result<Self, BuilderError> {
		let value: serde_json::Value =
			serde_json::from_str(json).map_err(|e| BuilderError::Abi(e.to_string()))?;
		let abi_value = match value {
			serde_json::Value::Object(mut artifact) => artifact
				.remove("abi")
				.ok_or_else(|| BuilderError::Abi("artifact has no 'abi' field".into()))?,
			other => other,
		};
		let abi: JsonAbi =
			serde_json::from_value(abi_value).map_err(|e| BuilderError::Abi(e.to_string()))?;
		Ok(Self { abi })
	}

	/// Reads and parses an ABI file.
	pub async fn from_file(path: &Path) -> Result<Self, BuilderError> {
		let json = tokio::fs::read_to_string(path)
			.await
			.map_err(|e| BuilderError::Abi(format!("{}: {}", path.display(), e)))?;
		Self::from_json(&json)
	}
}

impl CallEncoder for JsonAbiEncoder {
	fn encode_call(&self, method: &str, args: &[String]) -> Result<Bytes, BuilderError> {
		let overloads = self
			.abi
			.function(method)
			.ok_or_else(|| BuilderError::Abi(format!("unknown method '{}'", method)))?;
		let function = overloads
			.iter()
			.find(|f| f.inputs.len() == args.len())
			.ok_or_else(|| {
				BuilderError::Abi(format!(
					"no overload of '{}' takes {} arguments",
					method,
					args.len()
				))
			})?;

		let values = function
			.inputs
			.iter()
			.zip(args)
			.map(|(param, arg)| {
				let ty = param
					.resolve()
					.map_err(|e| BuilderError::Abi(format!("{}: {}", param.name, e)))?;
				ty.coerce_str(arg).map_err(|e| {
					BuilderError::Abi(format!("cannot encode '{}' as {}: {}", arg, ty, e))
				})
			})
			.collect::<Result<Vec<DynSolValue>, _>>()?;

		function
			.abi_encode_input(&values)
			.map(Bytes::from)
			.map_err(|e| BuilderError::Abi(e.to_string()))
	}

	fn has_method(&self, method: &str) -> bool {
		self.abi.function(method).is_some()
	}
}
