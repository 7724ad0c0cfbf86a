//! Settlement transaction assembly and wire-limit validation
//!
//! The on-chain program owns the instruction encoding; the layout here is a
//! length-prefixed message the relay forwards as-is. What is normative are
//! the ceilings: 1232 bytes per serialized message, 1 to 20 instructions,
//! 1024 bytes per instruction payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SettlementError;
use crate::models::{Decision, MeasurementWindow};

pub const MAX_TRANSACTION_SIZE: usize = 1232;
pub const MAX_INSTRUCTIONS: usize = 20;
pub const MAX_INSTRUCTION_DATA: usize = 1024;

pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 200_000;

/// `ComputeBudget111111111111111111111111111111`
pub const COMPUTE_BUDGET_PROGRAM_ID: [u8; 32] = [
    3, 6, 70, 111, 229, 33, 23, 50, 255, 236, 173, 186, 114, 195, 155, 231, 188, 140, 229, 187,
    197, 247, 18, 107, 44, 67, 155, 58, 64, 0, 0, 0,
];

const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
const SETTLE_INSTRUCTION_NAME: &str = "global:process_insurance_claim";

/// Recent block reference bounding how long a signed message stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessAnchor {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: [u8; 32],
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn set_compute_unit_limit(units: u32) -> Self {
        let mut data = Vec::with_capacity(5);
        data.push(SET_COMPUTE_UNIT_LIMIT);
        data.extend_from_slice(&units.to_le_bytes());
        Self {
            program_id: COMPUTE_BUDGET_PROGRAM_ID,
            data,
        }
    }
}

/// Payout instruction arguments for the settlement program.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementInstruction {
    pub attempt_id: Uuid,
    pub policy_id: String,
    pub window: MeasurementWindow,
    pub amount: u64,
    pub is_adverse: bool,
    pub consensus_magnitude: f64,
    pub agreement_ratio: f64,
    pub decision_digest: [u8; 32],
}

impl SettlementInstruction {
    pub fn new(attempt_id: Uuid, policy_id: &str, decision: &Decision, amount: u64) -> Self {
        Self {
            attempt_id,
            policy_id: policy_id.to_string(),
            window: decision.window,
            amount,
            is_adverse: decision.is_adverse,
            consensus_magnitude: decision.consensus_magnitude,
            agreement_ratio: decision.agreement_ratio,
            decision_digest: decision_digest(decision),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let policy = self.policy_id.as_bytes();
        let mut data = Vec::with_capacity(8 + 16 + 4 + policy.len() + 16 + 8 + 1 + 16 + 32);
        data.extend_from_slice(&instruction_discriminator(SETTLE_INSTRUCTION_NAME));
        data.extend_from_slice(self.attempt_id.as_bytes());
        data.extend_from_slice(&(policy.len() as u32).to_le_bytes());
        data.extend_from_slice(policy);
        data.extend_from_slice(&self.window.start.timestamp().to_le_bytes());
        data.extend_from_slice(&self.window.end.timestamp().to_le_bytes());
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.push(u8::from(self.is_adverse));
        data.extend_from_slice(&self.consensus_magnitude.to_le_bytes());
        data.extend_from_slice(&self.agreement_ratio.to_le_bytes());
        data.extend_from_slice(&self.decision_digest);
        data
    }

    pub fn into_instruction(self, program_id: [u8; 32]) -> Instruction {
        Instruction {
            program_id,
            data: self.encode(),
        }
    }
}

/// First eight bytes of `sha256(name)`, the settlement program's method selector.
fn instruction_discriminator(name: &str) -> [u8; 8] {
    let hash = Sha256::digest(name.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// SHA-256 over the canonical JSON form of the decision.
pub fn decision_digest(decision: &Decision) -> [u8; 32] {
    let canonical = serde_json::to_vec(decision).unwrap_or_default();
    Sha256::digest(&canonical).into()
}

/// Unsigned transaction as produced by the Build stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub fee_payer: [u8; 32],
    pub anchor: FreshnessAnchor,
    pub instructions: Vec<Instruction>,
}

impl TransactionDraft {
    /// Compute-budget ceiling first, then the settlement instruction.
    pub fn settlement(
        fee_payer: [u8; 32],
        anchor: FreshnessAnchor,
        compute_unit_limit: u32,
        settle: Instruction,
    ) -> Self {
        Self {
            fee_payer,
            anchor,
            instructions: vec![Instruction::set_compute_unit_limit(compute_unit_limit), settle],
        }
    }

    pub fn message_bytes(&self) -> Vec<u8> {
        let blockhash = self.anchor.blockhash.as_bytes();
        let mut out = Vec::with_capacity(MAX_TRANSACTION_SIZE);
        out.extend_from_slice(&self.fee_payer);
        out.extend_from_slice(&(blockhash.len() as u16).to_le_bytes());
        out.extend_from_slice(blockhash);
        out.extend_from_slice(&self.anchor.last_valid_block_height.to_le_bytes());
        out.extend_from_slice(&(self.instructions.len() as u16).to_le_bytes());
        for ix in &self.instructions {
            out.extend_from_slice(&ix.program_id);
            out.extend_from_slice(&(ix.data.len() as u16).to_le_bytes());
            out.extend_from_slice(&ix.data);
        }
        out
    }

    /// Enforce the wire protocol ceilings. Failures are never retried.
    pub fn validate(&self) -> Result<(), SettlementError> {
        let count = self.instructions.len();
        if count == 0 {
            return Err(SettlementError::TransactionRejected(
                "transaction carries no instructions".to_string(),
            ));
        }
        if count > MAX_INSTRUCTIONS {
            return Err(SettlementError::TransactionRejected(format!(
                "{count} instructions exceeds the limit of {MAX_INSTRUCTIONS}"
            )));
        }
        if let Some((index, ix)) = self
            .instructions
            .iter()
            .enumerate()
            .find(|(_, ix)| ix.data.len() > MAX_INSTRUCTION_DATA)
        {
            return Err(SettlementError::TransactionRejected(format!(
                "instruction {index} carries {} bytes, limit is {MAX_INSTRUCTION_DATA}",
                ix.data.len()
            )));
        }
        let size = self.message_bytes().len();
        if size > MAX_TRANSACTION_SIZE {
            return Err(SettlementError::TransactionRejected(format!(
                "serialized size {size} exceeds {MAX_TRANSACTION_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

/// A validated message plus the fee payer's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub message: Vec<u8>,
    pub signature: [u8; 64],
}

impl SignedTransaction {
    /// `[1][signature][message]`
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 64 + self.message.len());
        out.push(1);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.message);
        out
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.wire_bytes())
    }

    pub fn signature_hex(&self) -> String {
        hex::encode(self.signature)
    }
}
