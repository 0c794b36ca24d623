//! Transaction construction and signing.
//!
//! The builder turns one [`TransactionRequest`] into a signed, EIP-2718
//! encoded transaction. The shape of the request selects the variant:
//!
//! - no recipient: contract deployment, the input is init code
//! - blob parameters present: EIP-4844 blob transaction with its sidecar
//! - anything else: EIP-1559 transfer or call
//!
//! Building performs no I/O. Contract addresses of deployments are derived
//! from the sender and nonce.

pub mod abi;
pub mod blob;

use alloy_consensus::{
	SignableTransaction, Signed, TxEip1559, TxEip4844, TxEip4844Variant, TxEip4844WithSidecar,
	TxEnvelope,
};
use alloy_eips::eip2718::Encodable2718;
use alloy_eips::eip4844::BlobTransactionSidecar;
use alloy_primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use spammer_account::{ChainSigner, SenderAccount};
use spammer_types::WorkloadKind;
use thiserror::Error;

/// Errors that can occur while building a transaction.
#[derive(Debug, Error)]
pub enum BuilderError {
	/// The request is malformed or combines incompatible variants.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	/// Call data could not be encoded.
	#[error("ABI error: {0}")]
	Abi(String),
	/// Blob parameters are missing or invalid.
	#[error("Blob error: {0}")]
	Blob(String),
	/// The signer failed.
	#[error("Signing failed: {0}")]
	Signing(String),
}

/// Two-part fee model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
	pub gas_limit: u64,
	pub max_fee_per_gas: u128,
	pub max_priority_fee_per_gas: u128,
}

/// Blob payload of an EIP-4844 request.
#[derive(Debug, Clone)]
pub struct BlobParams {
	pub sidecar: BlobTransactionSidecar,
	pub max_fee_per_blob_gas: u128,
}

/// Everything needed to build one transaction.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
	pub sender: Address,
	pub nonce: u64,
	/// Recipient, or `None` for a contract deployment.
	pub to: Option<Address>,
	pub value: U256,
	pub gas: GasParams,
	/// Call data or init code.
	pub input: Bytes,
	pub blob: Option<BlobParams>,
}

impl TransactionRequest {
	/// The workload class this request belongs to.
	pub fn kind(&self) -> WorkloadKind {
		match (&self.to, &self.blob) {
			(None, _) => WorkloadKind::Deploy,
			(Some(_), Some(_)) => WorkloadKind::Blob,
			(Some(_), None) if self.input.is_empty() => WorkloadKind::Send,
			(Some(_), None) => WorkloadKind::Call,
		}
	}
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
	pub kind: WorkloadKind,
	pub sender: Address,
	pub nonce: u64,
	pub to: Option<Address>,
	/// EIP-2718 encoding. Blob transactions use the network form with sidecar.
	pub raw: Bytes,
	pub hash: B256,
	/// Address of the contract a deployment creates.
	pub contract_address: Option<Address>,
}

/// Builds and signs transactions for one chain.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
	signer: ChainSigner,
}

impl TransactionBuilder {
	pub fn new(signer: ChainSigner) -> Self {
		Self { signer }
	}

	pub fn chain_id(&self) -> u64 {
		self.signer.chain_id()
	}

	/// Checks the fee and blob parameters of a request without building it.
	/// Run before claiming the nonce the request will use.
	pub fn validate(&self, gas: &GasParams, blob: Option<&BlobParams>) -> Result<(), BuilderError> {
		if gas.max_priority_fee_per_gas > gas.max_fee_per_gas {
			return Err(BuilderError::InvalidRequest(
				"priority fee exceeds fee cap".into(),
			));
		}
		if let Some(blob) = blob {
			if blob.sidecar.blobs.is_empty() {
				return Err(BuilderError::Blob("blob sidecar is empty".into()));
			}
			if blob.max_fee_per_blob_gas == 0 {
				return Err(BuilderError::Blob("max_fee_per_blob_gas is required".into()));
			}
		}
		Ok(())
	}

	/// Builds the transaction described by `request`, signed by `account`.
	pub fn build(
		&self,
		request: TransactionRequest,
		account: &SenderAccount,
	) -> Result<SignedTransaction, BuilderError> {
		if request.sender != account.address() {
			return Err(BuilderError::InvalidRequest(format!(
				"request sender {} does not match signing account {}",
				request.sender,
				account.address()
			)));
		}
		self.validate(&request.gas, request.blob.as_ref())?;

		let kind = request.kind();
		let TransactionRequest {
			sender,
			nonce,
			to,
			value,
			gas,
			input,
			blob,
		} = request;

		let envelope = match (to, blob) {
			(None, Some(_)) => {
				return Err(BuilderError::InvalidRequest(
					"a contract deployment cannot carry blobs".into(),
				))
			},
			(to, None) => {
				let tx = TxEip1559 {
					chain_id: self.chain_id(),
					nonce,
					gas_limit: gas.gas_limit,
					max_fee_per_gas: gas.max_fee_per_gas,
					max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
					to: to.map(TxKind::Call).unwrap_or(TxKind::Create),
					value,
					access_list: Default::default(),
					input,
				};
				TxEnvelope::Eip1559(self.sign(tx, account)?)
			},
			(Some(to), Some(blob)) => {
				let tx = TxEip4844 {
					chain_id: self.chain_id(),
					nonce,
					gas_limit: gas.gas_limit,
					max_fee_per_gas: gas.max_fee_per_gas,
					max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
					to,
					value,
					access_list: Default::default(),
					blob_versioned_hashes: blob.sidecar.versioned_hashes().collect(),
					max_fee_per_blob_gas: blob.max_fee_per_blob_gas,
					input,
				};
				let tx = TxEip4844Variant::TxEip4844WithSidecar(
					TxEip4844WithSidecar::from_tx_and_sidecar(tx, blob.sidecar),
				);
				TxEnvelope::Eip4844(self.sign(tx, account)?)
			},
		};

		let contract_address = to.is_none().then(|| sender.create(nonce));
		Ok(SignedTransaction {
			kind,
			sender,
			nonce,
			to,
			raw: Bytes::from(envelope.encoded_2718()),
			hash: *envelope.tx_hash(),
			contract_address,
		})
	}

	fn sign<T>(&self, tx: T, account: &SenderAccount) -> Result<Signed<T>, BuilderError>
	where
		T: SignableTransaction<Signature>,
	{
		self.signer
			.sign(tx, account)
			.map_err(|e| BuilderError::Signing(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_consensus::Transaction;
	use alloy_eips::eip2718::Decodable2718;

	const CHAIN_ID: u64 = 1337;

	fn gas() -> GasParams {
		GasParams {
			gas_limit: 100_000,
			max_fee_per_gas: 2_000_000_000,
			max_priority_fee_per_gas: 1_000_000_000,
		}
	}

	fn request(account: &SenderAccount, nonce: u64) -> TransactionRequest {
		TransactionRequest {
			sender: account.address(),
			nonce,
			to: Some(Address::with_last_byte(0xd1)),
			value: U256::from(1),
			gas: gas(),
			input: Bytes::new(),
			blob: None,
		}
	}

	fn decode(raw: &Bytes) -> TxEnvelope {
		TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap()
	}

	#[test]
	fn test_transfer_round_trip() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));

		let signed = builder.build(request(&account, 3), &account).unwrap();
		assert_eq!(signed.kind, WorkloadKind::Send);
		assert_eq!(signed.contract_address, None);

		let envelope = decode(&signed.raw);
		assert_eq!(*envelope.tx_hash(), signed.hash);
		assert_eq!(envelope.nonce(), 3);
		assert_eq!(envelope.chain_id(), Some(CHAIN_ID));
		assert_eq!(envelope.to(), Some(Address::with_last_byte(0xd1)));
		assert_eq!(envelope.max_priority_fee_per_gas(), Some(1_000_000_000));
	}

	#[test]
	fn test_deploy_derives_contract_address() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		let mut deploy = request(&account, 9);
		deploy.to = None;
		deploy.input = Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]);

		let signed = builder.build(deploy.clone(), &account).unwrap();
		assert_eq!(signed.kind, WorkloadKind::Deploy);
		assert_eq!(signed.contract_address, Some(account.address().create(9)));

		// derivation is pure
		let again = builder.build(deploy, &account).unwrap();
		assert_eq!(again.contract_address, signed.contract_address);
		assert!(decode(&signed.raw).kind().is_create());
	}

	#[test]
	fn test_deploy_with_blob_rejected() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		let mut invalid = request(&account, 0);
		invalid.to = None;
		invalid.blob = Some(BlobParams {
			sidecar: blob::build_sidecar(1).unwrap(),
			max_fee_per_blob_gas: 1,
		});

		assert!(matches!(
			builder.build(invalid, &account),
			Err(BuilderError::InvalidRequest(_))
		));
	}

	#[test]
	fn test_blob_transaction() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		let mut with_blobs = request(&account, 1);
		with_blobs.blob = Some(BlobParams {
			sidecar: blob::build_sidecar(2).unwrap(),
			max_fee_per_blob_gas: 5,
		});

		let signed = builder.build(with_blobs, &account).unwrap();
		assert_eq!(signed.kind, WorkloadKind::Blob);

		let envelope = decode(&signed.raw);
		assert_eq!(*envelope.tx_hash(), signed.hash);
		assert_eq!(envelope.blob_versioned_hashes().map(|h| h.len()), Some(2));
		assert_eq!(envelope.max_fee_per_blob_gas(), Some(5));
	}

	#[test]
	fn test_blob_without_fee_rejected() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		let mut no_fee = request(&account, 1);
		no_fee.blob = Some(BlobParams {
			sidecar: blob::build_sidecar(1).unwrap(),
			max_fee_per_blob_gas: 0,
		});

		assert!(matches!(
			builder.build(no_fee, &account),
			Err(BuilderError::Blob(_))
		));
	}

	#[test]
	fn test_foreign_sender_rejected() {
		let account = SenderAccount::random();
		let other = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));

		assert!(matches!(
			builder.build(request(&other, 0), &account),
			Err(BuilderError::InvalidRequest(_))
		));
	}

	#[test]
	fn test_priority_above_cap_rejected() {
		let account = SenderAccount::random();
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		let mut bad = request(&account, 0);
		bad.gas.max_priority_fee_per_gas = bad.gas.max_fee_per_gas + 1;

		assert!(builder.build(bad, &account).is_err());
	}

	#[test]
	fn test_validate_checks_fees_and_blobs() {
		let builder = TransactionBuilder::new(ChainSigner::new(CHAIN_ID));
		assert!(builder.validate(&gas(), None).is_ok());

		let mut capped = gas();
		capped.max_fee_per_gas = capped.max_priority_fee_per_gas - 1;
		assert!(matches!(
			builder.validate(&capped, None),
			Err(BuilderError::InvalidRequest(_))
		));

		let empty = BlobParams {
			sidecar: BlobTransactionSidecar::default(),
			max_fee_per_blob_gas: 1,
		};
		assert!(matches!(
			builder.validate(&gas(), Some(&empty)),
			Err(BuilderError::Blob(_))
		));

		let blobs = BlobParams {
			sidecar: blob::build_sidecar(1).unwrap(),
			max_fee_per_blob_gas: 1,
		};
		assert!(builder.validate(&gas(), Some(&blobs)).is_ok());
	}
}
