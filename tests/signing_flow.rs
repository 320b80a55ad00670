//! End-to-end spend construction and multi-party signing

use ledger_shell::core::script::{invocation_script, parse_invocation};
use ledger_shell::core::{
    coin_asset_id, share_asset_id, Block, Coin, Contract, Fixed8, Ledger, MemoryLedger, OutPoint,
    TransactionBuilder, TransactionOutput,
};
use ledger_shell::crypto::{double_sha256, hash160, Hash160, KeyPair};
use ledger_shell::signing::{SignatureContext, SigningState};
use ledger_shell::wallet::Wallet;

fn whole(n: i64) -> Fixed8 {
    Fixed8::from_whole(n).unwrap()
}

fn output(asset_id: ledger_shell::crypto::Hash256, value: i64, to: Hash160) -> TransactionOutput {
    TransactionOutput {
        asset_id,
        value: whole(value),
        script_hash: to,
    }
}

/// Three key pairs sorted by public key, the order scripts embed them in
fn sorted_keys() -> Vec<KeyPair> {
    let mut keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
    keys.sort_by_key(|k| k.public_key());
    keys
}

#[test]
fn test_builder_adds_change_for_two_coins() {
    let asset = share_asset_id();
    let owner = hash160(b"owner");
    let coins: Vec<Coin> = (0..2)
        .map(|i| Coin {
            outpoint: OutPoint {
                tx_hash: double_sha256(&[i]),
                index: 0,
            },
            output: output(asset, 6, owner),
        })
        .collect();

    let unsigned = TransactionBuilder::new(coin_asset_id())
        .change_to(owner)
        .build(vec![output(asset, 10, hash160(b"payee"))], Fixed8::ZERO, &coins)
        .unwrap();

    assert_eq!(unsigned.transaction.inputs.len(), 2);
    assert_eq!(unsigned.transaction.outputs[0].value, whole(10));
    assert_eq!(unsigned.transaction.outputs[1].value, whole(2));
    assert_eq!(unsigned.transaction.outputs[1].script_hash, owner);
    assert_eq!(unsigned.script_hashes_for_verifying(), vec![owner]);
}

#[test]
fn test_two_of_three_across_wallets() {
    let keys = sorted_keys();
    let public: Vec<_> = keys.iter().map(KeyPair::public_key).collect();
    let contract = Contract::multisig(2, &public).unwrap();

    // Holders of the first and last key, each with its own wallet
    let mut wallet_a = Wallet::new();
    wallet_a
        .import_account(&keys[0].private_key_hex())
        .unwrap();
    wallet_a.add_contract(contract.clone()).unwrap();

    let mut wallet_c = Wallet::new();
    wallet_c
        .import_account(&keys[2].private_key_hex())
        .unwrap();
    wallet_c.add_contract(contract.clone()).unwrap();

    let ledger = MemoryLedger::with_genesis(Block::genesis(vec![output(
        coin_asset_id(),
        20,
        contract.script_hash(),
    )]))
    .unwrap();
    assert!(ledger.verify_blocks());

    let unsigned = wallet_c
        .make_transaction(
            vec![output(coin_asset_id(), 5, hash160(b"payee"))],
            whole(1),
            coin_asset_id(),
            &ledger,
        )
        .unwrap();

    // C signs first and ships the context as JSON
    let mut context = SignatureContext::new(&unsigned);
    assert!(wallet_c.sign(&mut context).unwrap());
    assert_eq!(context.state(), SigningState::PartiallySigned);
    assert!(context.finalize().is_err());
    let json = context.to_json().unwrap();

    // A completes it
    let mut received = SignatureContext::from_json(&json).unwrap();
    assert!(wallet_a.sign(&mut received).unwrap());
    assert!(received.is_complete());

    let signatures = received.signatures(&contract.script_hash()).unwrap();
    let expected = invocation_script(&[signatures[&public[0]], signatures[&public[2]]]);

    let tx = received.into_signed_transaction().unwrap();
    assert_eq!(tx.witnesses.len(), 1);
    assert_eq!(tx.witnesses[0].invocation, expected);
    assert_eq!(parse_invocation(&tx.witnesses[0].invocation).unwrap().len(), 2);

    // The ledger accepts it with verification on
    let next = ledger.get_block(0).unwrap().next(vec![tx.clone()]);
    ledger.apply_block(next).unwrap();
    assert_eq!(ledger.current_height(), Some(1));

    // Once included, the wallet forgets it
    wallet_c.save_transaction(tx);
    assert_eq!(wallet_c.prune_sent(&ledger), 1);
}

#[test]
fn test_merge_is_order_independent_across_json() {
    let keys = sorted_keys();
    let public: Vec<_> = keys.iter().map(KeyPair::public_key).collect();
    let contract = Contract::multisig(3, &public).unwrap();

    let ledger = MemoryLedger::with_genesis(Block::genesis(vec![output(
        share_asset_id(),
        3,
        contract.script_hash(),
    )]))
    .unwrap();
    let coins = ledger.unspent_coins(&[contract.script_hash()].into_iter().collect());
    let unsigned = TransactionBuilder::new(coin_asset_id())
        .build(vec![output(share_asset_id(), 3, hash160(b"payee"))], Fixed8::ZERO, &coins)
        .unwrap();

    let signed_by = |key: &KeyPair| {
        let mut context = SignatureContext::new(&unsigned);
        context.add_signature(&contract, key).unwrap();
        SignatureContext::from_json(&context.to_json().unwrap()).unwrap()
    };
    let (a, b, c) = (signed_by(&keys[0]), signed_by(&keys[1]), signed_by(&keys[2]));

    let mut left = a.clone();
    left.merge(&b).unwrap();
    left.merge(&c).unwrap();

    let mut right = c.clone();
    right.merge(&a).unwrap();
    right.merge(&b).unwrap();
    right.merge(&b).unwrap();

    assert!(left.is_complete());
    assert_eq!(left.finalize().unwrap(), right.finalize().unwrap());
    assert_eq!(left.to_json().unwrap(), right.to_json().unwrap());
}
