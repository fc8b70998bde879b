//! Withdrawal transaction construction and signing
//!
//! An unlock request pays `value - fee` to the requested address and returns
//! `total_inputs - value` to the operator. The difference between inputs and
//! outputs (exactly `fee`) is left to the coin chain miners.
//!
//! Two signing modes exist:
//! - `Complete` assembles every input and output first and signs each input
//!   with `SIGHASH_ALL`, so every signature commits to the final transaction.
//! - `Incremental` signs each input as soon as it is appended. A signature
//!   produced this way must not commit to inputs added later, so it uses
//!   `SIGHASH_ALL|ANYONECANPAY`. A scope committing to all inputs cannot be
//!   used incrementally unless every input is added before any is signed.

use super::Utxo;
use crate::config::{CoinNetwork, SigningMode};
use crate::error::{AgentError, AgentResult};
use crate::ledger::UnlockRequest;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, PubkeyHash, PublicKey, ScriptBuf, ScriptHash, Sequence, Transaction, TxIn,
    TxOut, Witness,
};
use std::str::FromStr;
use tracing::debug;

/// The operator's coin chain signing key
#[derive(Clone)]
pub struct OperatorKey {
    secret: SecretKey,
    public: PublicKey,
}

impl OperatorKey {
    pub fn new(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public = PublicKey::new(secret.public_key(&secp));
        Self { secret, public }
    }

    /// Parse a hex-encoded 32 byte secret key
    pub fn from_hex(hex_key: &str) -> AgentResult<Self> {
        let secret = SecretKey::from_str(hex_key.trim().trim_start_matches("0x"))
            .map_err(|e| AgentError::Wallet(format!("Invalid operator key: {}", e)))?;
        Ok(Self::new(secret))
    }

    /// Load the key from the environment variable named `var`
    pub fn from_env(var: &str) -> AgentResult<Self> {
        let value = std::env::var(var).map_err(|_| {
            AgentError::Wallet(format!("No operator key configured. Set {}", var))
        })?;
        Self::from_hex(&value)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// HASH160 of the compressed public key; identifies the operator on the ledger
    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.public.pubkey_hash()
    }

    pub fn pubkey_hash_bytes(&self) -> [u8; 20] {
        self.pubkey_hash().to_byte_array()
    }

    /// Pay-to-pubkey-hash script locking the operator's outputs
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.pubkey_hash())
    }
}

impl std::fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Decode a base58check P2PKH or P2SH address into its locking script
pub fn destination_script(address: &str, network: CoinNetwork) -> AgentResult<ScriptBuf> {
    let invalid = |message: String| AgentError::InvalidAddress {
        address: address.to_string(),
        message,
    };

    let data = bitcoin::base58::decode_check(address).map_err(|e| invalid(e.to_string()))?;
    if data.len() != 21 {
        return Err(invalid(format!("payload is {} bytes, expected 21", data.len())));
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&data[1..]);

    match data[0] {
        v if v == network.p2pkh_prefix() => {
            Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
        }
        v if v == network.p2sh_prefix() => {
            Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
        }
        v => Err(invalid(format!("unexpected version byte 0x{:02x}", v))),
    }
}

/// Builds signed withdrawal transactions for unlock requests
pub struct CoinTransactionBuilder {
    key: OperatorKey,
    network: CoinNetwork,
    mode: SigningMode,
    secp: Secp256k1<All>,
}

impl CoinTransactionBuilder {
    pub fn new(key: OperatorKey, network: CoinNetwork, mode: SigningMode) -> Self {
        Self {
            key,
            network,
            mode,
            secp: Secp256k1::new(),
        }
    }

    pub fn operator(&self) -> &OperatorKey {
        &self.key
    }

    /// Build and sign the withdrawal for `unlock`
    pub fn build(&self, unlock: &UnlockRequest) -> AgentResult<Transaction> {
        if unlock.selected_utxos.is_empty() {
            return Err(AgentError::TransactionBuild(format!(
                "unlock {} selects no UTXOs",
                unlock.id
            )));
        }

        let payout = unlock.value.checked_sub(unlock.fee).ok_or_else(|| {
            AgentError::TransactionBuild(format!(
                "unlock {} fee {} exceeds value {}",
                unlock.id, unlock.fee, unlock.value
            ))
        })?;

        let total_input_value = unlock
            .selected_utxos
            .iter()
            .try_fold(0u64, |acc, utxo| acc.checked_add(utxo.value))
            .ok_or_else(|| AgentError::TransactionBuild("input value overflow".to_string()))?;

        let change = total_input_value
            .checked_sub(unlock.value)
            .ok_or(AgentError::InsufficientInputs {
                have: total_input_value,
                need: unlock.value,
            })?;

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: Vec::with_capacity(unlock.selected_utxos.len()),
            output: Vec::with_capacity(2),
        };

        tx.output.push(TxOut {
            value: Amount::from_sat(payout),
            script_pubkey: destination_script(&unlock.destination, self.network)?,
        });
        if change > 0 {
            tx.output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: self.key.script_pubkey(),
            });
        }

        match self.mode {
            SigningMode::Complete => {
                for utxo in &unlock.selected_utxos {
                    tx.input.push(unsigned_input(utxo));
                }
                for index in 0..tx.input.len() {
                    self.sign_input(&mut tx, index, EcdsaSighashType::All)?;
                }
            }
            SigningMode::Incremental => {
                for utxo in &unlock.selected_utxos {
                    tx.input.push(unsigned_input(utxo));
                    let index = tx.input.len() - 1;
                    self.sign_input(&mut tx, index, EcdsaSighashType::AllPlusAnyoneCanPay)?;
                }
            }
        }

        debug!(
            "Built withdrawal {} for unlock {}: {} inputs, payout {}, change {}",
            tx.compute_txid(),
            unlock.id,
            tx.input.len(),
            payout,
            change
        );
        Ok(tx)
    }

    /// Sign input `index`, which spends a P2PKH output of the operator
    fn sign_input(
        &self,
        tx: &mut Transaction,
        index: usize,
        sighash_type: EcdsaSighashType,
    ) -> AgentResult<()> {
        let script_code = self.key.script_pubkey();
        let sighash = SighashCache::new(&*tx)
            .legacy_signature_hash(index, &script_code, sighash_type.to_u32())
            .map_err(|e| AgentError::TransactionBuild(e.to_string()))?;

        let message = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&message, &self.key.secret),
            sighash_type,
        };

        tx.input[index].script_sig = ScriptBuf::builder()
            .push_slice(signature.serialize())
            .push_key(&self.key.public)
            .into_script();
        Ok(())
    }
}

fn unsigned_input(utxo: &Utxo) -> TxIn {
    TxIn {
        previous_output: OutPoint::new(utxo.txid, utxo.vout),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bitcoin::script::Instruction;
    use bitcoin::Txid;

    pub(crate) const OPERATOR_SECRET: &str =
        "0101010101010101010101010101010101010101010101010101010101010101";

    pub(crate) fn operator() -> OperatorKey {
        OperatorKey::from_hex(OPERATOR_SECRET).unwrap()
    }

    pub(crate) fn regtest_address(hash: [u8; 20]) -> String {
        let mut payload = vec![CoinNetwork::Regtest.p2pkh_prefix()];
        payload.extend_from_slice(&hash);
        bitcoin::base58::encode_check(&payload)
    }

    pub(crate) fn utxo(seed: u8, value: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([seed; 32]),
            vout: seed as u32,
            value,
        }
    }

    pub(crate) fn unlock(id: u64, value: u64, fee: u64, utxos: Vec<Utxo>) -> UnlockRequest {
        UnlockRequest {
            id,
            operator_key_hash: operator().pubkey_hash_bytes(),
            destination: regtest_address([7u8; 20]),
            value,
            fee,
            selected_utxos: utxos,
        }
    }

    fn builder(mode: SigningMode) -> CoinTransactionBuilder {
        CoinTransactionBuilder::new(operator(), CoinNetwork::Regtest, mode)
    }

    fn assert_inputs_signed(tx: &Transaction, key: &OperatorKey, expected: EcdsaSighashType) {
        let secp = Secp256k1::verification_only();
        for (index, input) in tx.input.iter().enumerate() {
            let pushes: Vec<Vec<u8>> = input
                .script_sig
                .instructions()
                .map(|ins| match ins.unwrap() {
                    Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
                    Instruction::Op(op) => panic!("unexpected opcode {:?}", op),
                })
                .collect();
            assert_eq!(pushes.len(), 2);
            assert_eq!(pushes[1], key.public_key().to_bytes());

            let signature = bitcoin::ecdsa::Signature::from_slice(&pushes[0]).unwrap();
            assert_eq!(signature.sighash_type, expected);

            let sighash = SighashCache::new(tx)
                .legacy_signature_hash(index, &key.script_pubkey(), expected.to_u32())
                .unwrap();
            let message = Message::from_digest(sighash.to_byte_array());
            secp.verify_ecdsa(&message, &signature.signature, &key.public_key().inner)
                .unwrap();
        }
    }

    #[test]
    fn test_change_output_when_inputs_exceed_value() {
        let tx = builder(SigningMode::Complete)
            .build(&unlock(1, 100, 5, vec![utxo(1, 100), utxo(2, 50)]))
            .unwrap();

        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, Amount::from_sat(95));
        assert_eq!(
            tx.output[0].script_pubkey,
            ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([7u8; 20]))
        );
        assert_eq!(tx.output[1].value, Amount::from_sat(50));
        assert_eq!(tx.output[1].script_pubkey, operator().script_pubkey());
        assert_eq!(tx.input.len(), 2);
    }

    #[test]
    fn test_no_change_output_when_inputs_match_value() {
        let tx = builder(SigningMode::Complete)
            .build(&unlock(2, 100, 5, vec![utxo(1, 60), utxo(2, 40)]))
            .unwrap();

        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value, Amount::from_sat(95));
    }

    #[test]
    fn test_inputs_reference_selected_utxos_in_order() {
        let utxos = vec![utxo(3, 70), utxo(4, 70)];
        let tx = builder(SigningMode::Complete)
            .build(&unlock(3, 100, 1, utxos.clone()))
            .unwrap();

        let outpoints: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        assert_eq!(
            outpoints,
            utxos
                .iter()
                .map(|u| OutPoint::new(u.txid, u.vout))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_complete_mode_signs_with_sighash_all() {
        let tx = builder(SigningMode::Complete)
            .build(&unlock(4, 100, 5, vec![utxo(1, 100), utxo(2, 50)]))
            .unwrap();
        assert_inputs_signed(&tx, &operator(), EcdsaSighashType::All);
    }

    #[test]
    fn test_incremental_mode_signs_with_anyone_can_pay() {
        let tx = builder(SigningMode::Incremental)
            .build(&unlock(5, 100, 5, vec![utxo(1, 100), utxo(2, 50)]))
            .unwrap();
        assert_inputs_signed(&tx, &operator(), EcdsaSighashType::AllPlusAnyoneCanPay);
    }

    #[test]
    fn test_insufficient_inputs_rejected() {
        let err = builder(SigningMode::Complete)
            .build(&unlock(6, 100, 5, vec![utxo(1, 99)]))
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::InsufficientInputs { have: 99, need: 100 }
        ));
    }

    #[test]
    fn test_fee_above_value_rejected() {
        let err = builder(SigningMode::Complete)
            .build(&unlock(7, 5, 6, vec![utxo(1, 10)]))
            .unwrap_err();
        assert!(matches!(err, AgentError::TransactionBuild(_)));
    }

    #[test]
    fn test_destination_with_foreign_prefix_rejected() {
        let mut payload = vec![CoinNetwork::Mainnet.p2pkh_prefix()];
        payload.extend_from_slice(&[7u8; 20]);
        let mainnet = bitcoin::base58::encode_check(&payload);

        assert!(destination_script(&mainnet, CoinNetwork::Regtest).is_err());
        assert!(destination_script(&mainnet, CoinNetwork::Mainnet).is_ok());
        assert!(destination_script("not-an-address", CoinNetwork::Mainnet).is_err());
    }

    #[test]
    fn test_p2sh_destination() {
        let mut payload = vec![CoinNetwork::Testnet.p2sh_prefix()];
        payload.extend_from_slice(&[9u8; 20]);
        let address = bitcoin::base58::encode_check(&payload);

        let script = destination_script(&address, CoinNetwork::Testnet).unwrap();
        assert!(script.is_p2sh());
    }
}
