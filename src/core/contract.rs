//! Verification contracts
//!
//! A contract pairs a verification script with its parameter list. The
//! script hash identifies the contract on chain and is what outputs pay to.

use crate::core::script::{self, ScriptError, ScriptKind};
use crate::crypto::{hash160, script_hash_to_address, Hash160, PubKey};
use serde::{Deserialize, Serialize};

/// Parameter types a verification script can consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractParameterType {
    Signature,
}

/// A verification script and the parameters its invocation must supply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(with = "crate::crypto::hash::serde_hex")]
    pub script: Vec<u8>,
    pub parameter_list: Vec<ContractParameterType>,
}

impl Contract {
    /// Standard single-signature contract for `key`
    pub fn single(key: &PubKey) -> Self {
        Self {
            script: script::single_signature_script(key),
            parameter_list: vec![ContractParameterType::Signature],
        }
    }

    /// m-of-n contract; keys are embedded in ascending order
    pub fn multisig(threshold: usize, keys: &[PubKey]) -> Result<Self, ScriptError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        let script = script::multisig_script(threshold, &sorted)?;
        Ok(Self {
            script,
            parameter_list: vec![ContractParameterType::Signature; threshold],
        })
    }

    /// Wrap an existing verification script, deriving its parameter list
    pub fn from_script(script: Vec<u8>) -> Result<Self, ScriptError> {
        let kind = script::classify(&script)?;
        Ok(Self {
            script,
            parameter_list: vec![ContractParameterType::Signature; kind.threshold()],
        })
    }

    pub fn script_hash(&self) -> Hash160 {
        hash160(&self.script)
    }

    pub fn address(&self) -> String {
        script_hash_to_address(&self.script_hash())
    }

    pub fn kind(&self) -> Result<ScriptKind, ScriptError> {
        script::classify(&self.script)
    }

    /// Standard contracts are single-signature
    pub fn is_standard(&self) -> bool {
        matches!(self.kind(), Ok(ScriptKind::SingleSignature { .. }))
    }
}
