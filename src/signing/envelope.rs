//! Unsigned transaction envelopes.
//!
//! Turns an enriched [`TransactionRequest`] into the network-appropriate
//! consensus transaction (EIP-1559 type 2, or EIP-155 legacy), exposes its
//! signing payload, and assembles the final [`SignedTransaction`].

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::eip2930::AccessList;
use alloy::primitives::{TxKind, B256};
use alloy::signers::Signature;

use crate::networks::{FeeFields, Network, SignedTransaction, TransactionRequest};
use crate::signing::{SigningError, SigningResult};

#[derive(Debug, Clone)]
enum Body {
    Eip1559(TxEip1559),
    Legacy(TxLegacy),
}

/// A transaction ready to be signed.
#[derive(Debug, Clone)]
pub struct UnsignedEnvelope {
    request: TransactionRequest,
    nonce: u64,
    gas_limit: u64,
    fees: FeeFields,
    body: Body,
}

impl UnsignedEnvelope {
    /// Build the envelope for `request` on `network`.
    ///
    /// Fails with `InvalidRequest` when the request is not enriched, targets
    /// another network, or carries fees for the wrong fee model.
    pub fn build(request: &TransactionRequest, network: &Network) -> SigningResult<Self> {
        if request.network() != network.chain_id {
            return Err(SigningError::InvalidRequest(format!(
                "request for chain {} built against chain {}",
                request.network(),
                network.chain_id
            )));
        }
        let (nonce, gas_limit, fees) = match (request.nonce, request.gas_limit, request.fees) {
            (Some(nonce), Some(gas_limit), Some(fees)) => (nonce, gas_limit, fees),
            _ => {
                return Err(SigningError::InvalidRequest(
                    "nonce, gas limit and fees must be set before signing".into(),
                ))
            }
        };
        if fees.fee_model() != network.fee_model {
            return Err(SigningError::InvalidRequest(format!(
                "{:?} fees on a {:?} network",
                fees.fee_model(),
                network.fee_model
            )));
        }
        if gas_limit == 0 {
            return Err(SigningError::InvalidRequest("gas limit is zero".into()));
        }
        let to = match request.to {
            Some(to) => TxKind::Call(to),
            None if request.input.is_empty() => {
                return Err(SigningError::InvalidRequest(
                    "contract creation without init code".into(),
                ))
            }
            None => TxKind::Create,
        };

        let chain_id = network.chain_id.0;
        let body = match fees {
            FeeFields::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                if max_priority_fee_per_gas > max_fee_per_gas {
                    return Err(SigningError::InvalidRequest(
                        "priority fee exceeds max fee".into(),
                    ));
                }
                Body::Eip1559(TxEip1559 {
                    chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to,
                    value: request.value,
                    access_list: AccessList::default(),
                    input: request.input.clone(),
                })
            }
            FeeFields::Legacy { gas_price } => Body::Legacy(TxLegacy {
                chain_id: Some(chain_id),
                nonce,
                gas_price,
                gas_limit,
                to,
                value: request.value,
                input: request.input.clone(),
            }),
        };

        Ok(Self {
            request: request.clone(),
            nonce,
            gas_limit,
            fees,
            body,
        })
    }

    /// Hash the signer commits to.
    pub fn signature_hash(&self) -> B256 {
        match &self.body {
            Body::Eip1559(tx) => tx.signature_hash(),
            Body::Legacy(tx) => tx.signature_hash(),
        }
    }

    /// Bytes whose keccak is [`signature_hash`](Self::signature_hash).
    pub fn signing_payload(&self) -> Vec<u8> {
        match &self.body {
            Body::Eip1559(tx) => tx.encoded_for_signing(),
            Body::Legacy(tx) => tx.encoded_for_signing(),
        }
    }

    /// Attach `signature` and encode the broadcastable transaction.
    pub fn into_signed(self, signature: Signature) -> SignedTransaction {
        let envelope: TxEnvelope = match self.body {
            Body::Eip1559(tx) => tx.into_signed(signature).into(),
            Body::Legacy(tx) => tx.into_signed(signature).into(),
        };
        let hash = *envelope.tx_hash();
        let raw = envelope.encoded_2718();
        SignedTransaction::new(
            self.request,
            self.nonce,
            self.gas_limit,
            self.fees,
            signature,
            hash,
            raw.into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::registry::{ethereum, rootstock};
    use crate::networks::NetworkAddress;
    use alloy::primitives::{keccak256, Address, U256};

    fn enriched(chain_id: u64, fees: FeeFields) -> TransactionRequest {
        TransactionRequest::new(NetworkAddress::new(Address::repeat_byte(1), chain_id))
            .with_to(Address::repeat_byte(2))
            .with_value(U256::from(1_000u64))
            .with_nonce(5)
            .with_gas_limit(21_000)
            .with_fees(fees)
    }

    #[test]
    fn test_payload_hashes_to_signature_hash() {
        let request = enriched(
            1,
            FeeFields::Eip1559 {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            },
        );
        let envelope = UnsignedEnvelope::build(&request, &ethereum()).unwrap();
        assert_eq!(keccak256(envelope.signing_payload()), envelope.signature_hash());
    }

    #[test]
    fn test_fee_model_mismatch_rejected() {
        let request = enriched(30, FeeFields::Eip1559 {
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 1,
        });
        let err = UnsignedEnvelope::build(&request, &rootstock()).unwrap_err();
        assert!(matches!(err, SigningError::InvalidRequest(_)));
    }

    #[test]
    fn test_unenriched_rejected() {
        let request = TransactionRequest::new(NetworkAddress::new(Address::repeat_byte(1), 1))
            .with_to(Address::repeat_byte(2));
        assert!(UnsignedEnvelope::build(&request, &ethereum()).is_err());
    }

    #[test]
    fn test_wrong_network_rejected() {
        let request = enriched(10, FeeFields::Eip1559 {
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 1,
        });
        assert!(UnsignedEnvelope::build(&request, &ethereum()).is_err());
    }
}
