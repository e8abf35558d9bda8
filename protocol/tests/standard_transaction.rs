//! End-to-end tests for Tessera transactions.
//!
//! Each scenario runs the whole lifecycle: accounts and addresses are
//! created, an output is "received", spent through a template, signed by
//! one or more key stores, finalized, serialized and validated against a
//! UTXO snapshot. Every test owns its stores and snapshot.

use tessera_protocol::account::{utxo_to_input, AccountManager, KeySpace, Utxo};
use tessera_protocol::address::Address;
use tessera_protocol::config::{ConsensusParams, Network, BASE_ASSET_ID};
use tessera_protocol::message::{sign_message, verify_message};
use tessera_protocol::transaction::{sign, sign_progress, MemoryKeyStore, TxBuilder};
use tessera_protocol::types::{AssetId, Hash, TxData, TxOutput};
use tessera_protocol::validation::{
    validate_batch, validate_tx, MemoryUtxoView, RejectKind, UtxoEntry, ValidationContext,
    Verdict,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const FUNDING_TX: Hash = Hash([0xf0; 32]);

fn context() -> ValidationContext {
    ValidationContext::new(100, 1_700_000_000_000, ConsensusParams::default())
}

/// Registers an output of `amount` paid to a fresh address of
/// `account_id`, and records it in `view`.
fn receive(
    accounts: &AccountManager,
    view: &mut MemoryUtxoView,
    account_id: &str,
    asset: AssetId,
    amount: u64,
    position: u64,
) -> Utxo {
    let cp = accounts.create_address(account_id).unwrap();
    let utxo = Utxo::new(
        FUNDING_TX,
        position,
        asset,
        amount,
        cp.control_program,
        account_id.to_string(),
        cp.key_index,
    )
    .unwrap();
    view.insert(utxo.output_id, UtxoEntry::unspent(1));
    utxo
}

/// Round-trips the finalized transaction through its wire encoding, the
/// way a relaying node would see it.
fn over_the_wire(tx: &TxData) -> TxData {
    TxData::from_bytes(&tx.to_bytes().unwrap()).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn single_key_spend_is_accepted() {
    let store = MemoryKeyStore::new();
    let xpub = store.create_key("alice", "alice-pw").unwrap();
    let accounts = AccountManager::new(Network::Testnet);
    let alice = accounts
        .create_account(vec![xpub], 1, "alice", KeySpace::Address)
        .unwrap();

    let mut view = MemoryUtxoView::new();
    let utxo = receive(&accounts, &mut view, &alice.id, BASE_ASSET_ID, 1_000, 0);

    let (input, instruction) = utxo_to_input(&alice.signer, &utxo).unwrap();
    let bob = Address::from_public_key(Network::Testnet, &[7u8; 32]);
    let mut template = TxBuilder::new()
        .input(input, instruction)
        .output(TxOutput::new(BASE_ASSET_ID, 900, bob.p2pkh_program().unwrap()))
        .build()
        .unwrap();

    assert!(!sign_progress(&template));
    assert_eq!(sign(&mut template, "alice-pw", &store).unwrap(), 1);
    assert!(sign_progress(&template));

    let tx = over_the_wire(&template.finalize());
    let mapped = tx.map().unwrap();
    assert_eq!(mapped.id, template.id().unwrap());

    match validate_tx(&mapped, &view, &context()).unwrap() {
        Verdict::Accept(accepted) => {
            assert_eq!(accepted.fee, 100);
            assert_eq!(accepted.tx_id, mapped.id);
        }
        Verdict::Reject(r) => panic!("rejected: {:?}", r),
    }

    // Once applied, the same spend no longer validates.
    assert!(view.apply_spends(&mapped));
    let again = validate_tx(&mapped, &view, &context()).unwrap();
    assert_eq!(again.rejection().unwrap().kind, RejectKind::MissingUtxo);
}

#[test]
fn two_of_two_account_in_one_store() {
    let store = MemoryKeyStore::new();
    let k1 = store.create_key("k1", "pw").unwrap();
    let k2 = store.create_key("k2", "pw").unwrap();
    let accounts = AccountManager::new(Network::Regtest);
    let treasury = accounts
        .create_account(vec![k1, k2], 2, "treasury", KeySpace::Address)
        .unwrap();

    let mut view = MemoryUtxoView::new();
    let utxo = receive(&accounts, &mut view, &treasury.id, BASE_ASSET_ID, 500, 0);
    let (input, instruction) = utxo_to_input(&treasury.signer, &utxo).unwrap();

    let change = accounts.create_address(&treasury.id).unwrap();
    let mut template = TxBuilder::new()
        .input(input, instruction)
        .output(TxOutput::new(BASE_ASSET_ID, 490, change.control_program))
        .build()
        .unwrap();

    assert_eq!(sign(&mut template, "pw", &store).unwrap(), 2);
    assert_eq!(template.signature_counts(), vec![2]);
    // Nothing left to do on a second pass.
    assert_eq!(sign(&mut template, "pw", &store).unwrap(), 0);

    let mapped = over_the_wire(&template.finalize()).map().unwrap();
    assert!(validate_tx(&mapped, &view, &context()).unwrap().is_accept());
}

#[test]
fn two_of_two_across_stores_reaches_quorum_only_with_both() {
    let store_a = MemoryKeyStore::new();
    let store_b = MemoryKeyStore::new();
    let ka = store_a.create_key("a", "pw-a").unwrap();
    let kb = store_b.create_key("b", "pw-b").unwrap();
    let accounts = AccountManager::new(Network::Testnet);
    let joint = accounts
        .create_account(vec![ka, kb], 2, "joint", KeySpace::Address)
        .unwrap();

    let mut view = MemoryUtxoView::new();
    let utxo = receive(&accounts, &mut view, &joint.id, BASE_ASSET_ID, 300, 0);
    let (input, instruction) = utxo_to_input(&joint.signer, &utxo).unwrap();
    let mut template = TxBuilder::new()
        .input(input, instruction)
        .output(TxOutput::new(BASE_ASSET_ID, 299, vec![0x51]))
        .build()
        .unwrap();

    assert_eq!(sign(&mut template, "pw-a", &store_a).unwrap(), 1);
    assert!(!sign_progress(&template));
    let half = template.finalize().map().unwrap();
    assert_eq!(
        validate_tx(&half, &view, &context()).unwrap().rejection().unwrap().kind,
        RejectKind::BadWitness
    );

    assert_eq!(sign(&mut template, "pw-b", &store_b).unwrap(), 1);
    assert!(sign_progress(&template));
    let full = over_the_wire(&template.finalize()).map().unwrap();
    assert!(validate_tx(&full, &view, &context()).unwrap().is_accept());
}

#[test]
fn multi_node_signing_with_separate_passwords() {
    let node_a = MemoryKeyStore::new();
    let node_b = MemoryKeyStore::new();
    let node_c = MemoryKeyStore::new();
    let ka = node_a.create_key("a", "pw-a").unwrap();
    let kb = node_b.create_key("b", "pw-b").unwrap();
    let kc = node_c.create_key("c", "pw-c").unwrap();

    let accounts = AccountManager::new(Network::Mainnet);
    let escrow = accounts
        .create_account(vec![ka, kb, kc], 2, "escrow", KeySpace::Address)
        .unwrap();

    let gold = AssetId([0x60; 32]);
    let mut view = MemoryUtxoView::new();
    let gold_utxo = receive(&accounts, &mut view, &escrow.id, gold, 40, 0);
    let fee_utxo = receive(&accounts, &mut view, &escrow.id, BASE_ASSET_ID, 10, 1);

    let (gold_in, gold_instr) = utxo_to_input(&escrow.signer, &gold_utxo).unwrap();
    let (fee_in, fee_instr) = utxo_to_input(&escrow.signer, &fee_utxo).unwrap();
    let payee = Address::from_public_key(Network::Mainnet, &[9u8; 32])
        .p2pkh_program()
        .unwrap();
    let unsigned = TxBuilder::new()
        .input(gold_in, gold_instr)
        .input(fee_in, fee_instr)
        .output(TxOutput::new(gold, 40, payee))
        .reference_data(b"invoice 42".to_vec())
        .build()
        .unwrap();

    // Node A signs but cannot reach quorum alone.
    let mut at_a = unsigned.clone();
    assert_eq!(sign(&mut at_a, "pw-a", &node_a).unwrap(), 2);
    assert!(!sign_progress(&at_a));

    // Node C gets the wrong password first: nothing is signed.
    let mut at_c = unsigned.clone();
    assert_eq!(sign(&mut at_c, "pw-a", &node_c).unwrap(), 0);
    assert_eq!(sign(&mut at_c, "pw-c", &node_c).unwrap(), 2);

    // The coordinator combines both partial templates.
    let mut combined = unsigned;
    assert_eq!(combined.merge(&at_c).unwrap(), 2);
    assert_eq!(combined.merge(&at_a).unwrap(), 2);
    assert!(sign_progress(&combined));
    assert_eq!(combined.signature_counts(), vec![2, 2]);

    let mapped = over_the_wire(&combined.finalize()).map().unwrap();
    let verdict = validate_tx(&mapped, &view, &context()).unwrap();
    match verdict {
        Verdict::Accept(accepted) => assert_eq!(accepted.fee, 10),
        Verdict::Reject(r) => panic!("rejected: {:?}", r),
    }

    // Node B never participated; its slot stays empty.
    assert!(node_b.contains(&kb));
    for instruction in combined.signing_instructions() {
        assert!(instruction.slots()[1].is_none());
    }
}

#[test]
fn output_with_suffix_is_spendable() {
    let store = MemoryKeyStore::new();
    let xpub = store.create_key("dave", "pw").unwrap();
    let accounts = AccountManager::new(Network::Testnet);
    let dave = accounts
        .create_account(vec![xpub], 1, "dave", KeySpace::Address)
        .unwrap();

    let mut view = MemoryUtxoView::new();
    let funding = receive(&accounts, &mut view, &dave.id, BASE_ASSET_ID, 1_000, 0);
    let (input, instruction) = utxo_to_input(&dave.signer, &funding).unwrap();
    let next = accounts.create_address(&dave.id).unwrap();
    let mut parent = TxBuilder::new()
        .input(input, instruction)
        .output(TxOutput {
            suffix: vec![0x01],
            ..TxOutput::new(BASE_ASSET_ID, 950, next.control_program.clone())
        })
        .build()
        .unwrap();
    assert_eq!(sign(&mut parent, "pw", &store).unwrap(), 1);
    let parent = over_the_wire(&parent.finalize()).map().unwrap();
    assert_eq!(parent.tx.outputs[0].suffix, vec![0x01]);

    // The wallet records the received output together with its suffix.
    let received = Utxo::new(
        parent.id,
        0,
        BASE_ASSET_ID,
        950,
        next.control_program,
        dave.id.clone(),
        next.key_index,
    )
    .unwrap()
    .with_suffix(vec![0x01])
    .unwrap();
    assert_eq!(received.output_id, parent.output_ids[0]);

    let (input, instruction) = utxo_to_input(&dave.signer, &received).unwrap();
    let mut child = TxBuilder::new()
        .input(input, instruction)
        .output(TxOutput::new(BASE_ASSET_ID, 900, vec![0x51]))
        .build()
        .unwrap();
    assert_eq!(sign(&mut child, "pw", &store).unwrap(), 1);
    let child = over_the_wire(&child.finalize()).map().unwrap();
    assert_eq!(child.spent_output_ids[0], parent.output_ids[0]);

    // Both in one block.
    let outcome = validate_batch(&[parent.clone(), child.clone()], &view, &context()).unwrap();
    assert!(outcome.verdicts.iter().all(Verdict::is_accept), "{:?}", outcome.verdicts);
    assert_eq!(outcome.total_fees, 100);

    // Or the child alone, once the parent is applied.
    assert!(view.apply_spends(&parent));
    view.add_outputs(&parent, 100);
    assert!(validate_tx(&child, &view, &context()).unwrap().is_accept());
}

#[test]
fn message_signature_round_trip() {
    let store = MemoryKeyStore::new();
    let xpub = store.create_key("carol", "pw").unwrap();
    let accounts = AccountManager::new(Network::Testnet);
    let carol = accounts
        .create_account(vec![xpub], 1, "carol", KeySpace::Address)
        .unwrap();
    let cp = accounts.create_address(&carol.id).unwrap();

    let message = b"I control this address";
    let signed = sign_message(&accounts, &store, &cp.address, message, "pw").unwrap();

    let padded = format!("  {}\n", cp.address);
    let verified =
        verify_message(Network::Testnet, &padded, &signed.derived_xpub, message, &signed.signature)
            .unwrap();
    assert!(verified.result);

    let forged = verify_message(
        Network::Testnet,
        &cp.address,
        &signed.derived_xpub,
        b"I control that address",
        &signed.signature,
    )
    .unwrap();
    assert!(!forged.result);
}
