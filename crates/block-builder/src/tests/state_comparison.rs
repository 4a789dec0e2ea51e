//! Commit-level strategy comparisons: plain transactions, failing
//! transactions, atomic bundles and contract workloads.

use super::*;
use crate::evm::{create_address, HarnessVm, DATA_NONZERO_GAS, TX_GAS};
use crate::primitives::MevBundle;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn three_transfers_converge() {
    let mut signers = SignerList::new(3);
    let mut contexts = strategy_contexts(GAS_LIMIT, &signers);
    let vm = HarnessVm::new();

    let txs: Vec<_> = (0..3)
        .map(|from| {
            let to = signers.addresses[from];
            signers.sign_tx(
                from,
                TX_GAS,
                1,
                2,
                TxKind::Call(to),
                U256::ZERO,
                Bytes::new(),
            )
        })
        .collect();

    for ctx in &mut contexts {
        for tx in &txs {
            let (skip, result) = ctx.commit_tx(tx, &vm);
            assert_eq!(skip, SkipCode::ShiftTx, "{}", ctx.name);
            let receipt = result.unwrap();
            assert!(receipt.success);
            assert_eq!(receipt.gas_used, TX_GAS);
        }
        assert_eq!(ctx.env.tcount(), 3, "{}", ctx.name);
        assert_eq!(
            GAS_LIMIT - ctx.env.gas_pool().gas(),
            3 * TX_GAS,
            "{}",
            ctx.name
        );
        assert_eq!(ctx.env.profit(), U256::from(3 * TX_GAS), "{}", ctx.name);
    }
    assert_contexts_converge(&contexts);
}

#[test]
fn nonce_collision_bundle_is_atomic_everywhere() {
    let signers = SignerList::new(3);
    let mut contexts = strategy_contexts(GAS_LIMIT, &signers);
    let vm = HarnessVm::new();
    let roots_before: Vec<_> = contexts.iter().map(StrategyContext::root).collect();

    // both txs spend nonce 0 of signer 1; the second must fail and is not
    // revertible, so the whole bundle has to unwind
    let tx1 = signers.sign_tx_with_nonce(
        1,
        0,
        TX_GAS,
        1,
        2,
        TxKind::Call(signers.addresses[2]),
        U256::ZERO,
        Bytes::new(),
    );
    let tx2 = signers.sign_tx_with_nonce(
        1,
        0,
        TX_GAS,
        1,
        2,
        TxKind::Call(signers.addresses[0]),
        U256::ZERO,
        Bytes::new(),
    );
    let sim = SimulatedBundle {
        bundle: MevBundle::new(vec![tx1, tx2], 1),
        mev_gas_price: Some(U256::from(1u64)),
        total_eth: U256::from(2 * TX_GAS),
        total_gas_used: 2 * TX_GAS,
        profit: U256::from(2 * TX_GAS),
    };

    let algo = AlgorithmConfig::default();
    for (ctx, root_before) in contexts.iter_mut().zip(&roots_before) {
        let err = ctx.commit_bundle(&sim, &algo, &vm).unwrap_err();
        assert!(
            matches!(err, BundleCommitError::TxFailed { .. }),
            "{}: {err}",
            ctx.name
        );
        assert_eq!(ctx.root(), *root_before, "{}", ctx.name);
        assert_eq!(ctx.env.tcount(), 0, "{}", ctx.name);
    }
    assert_contexts_converge(&contexts);
}

#[test]
fn hundred_alternating_pass_fail_txs_converge() {
    const TX_COUNT: usize = 100;

    let mut signers = SignerList::new(3);
    let mut contexts = strategy_contexts(GAS_LIMIT, &signers);
    let vm = HarnessVm::new();

    // Even indices carry one nonzero calldata byte with a bare-transfer
    // gas limit, so they are rejected for intrinsic gas before touching
    // state; their nonce is deliberately not advanced.
    let mut workload = Vec::with_capacity(TX_COUNT);
    for idx in 0..TX_COUNT {
        let from = idx % signers.addresses.len();
        let to = signers.addresses[(idx + 1) % signers.addresses.len()];
        let should_fail = idx % 2 == 0;
        let tx = if should_fail {
            signers.sign_tx_with_nonce(
                from,
                signers.nonces[from],
                TX_GAS,
                1,
                2,
                TxKind::Call(to),
                U256::ZERO,
                Bytes::from_static(&[0x01]),
            )
        } else {
            signers.sign_tx(from, TX_GAS, 1, 2, TxKind::Call(to), U256::ZERO, Bytes::new())
        };
        workload.push((tx, should_fail));
    }

    for ctx in &mut contexts {
        for (idx, (tx, should_fail)) in workload.iter().enumerate() {
            let (_, result) = ctx.commit_tx(tx, &vm);
            if *should_fail {
                let err = result.expect_err("even tx must be rejected");
                assert_eq!(
                    err,
                    TxCommitError::Execution(crate::evm::ExecutionError::IntrinsicGasTooLow {
                        needed: TX_GAS + DATA_NONZERO_GAS,
                        limit: TX_GAS,
                    }),
                    "{} tx {idx}",
                    ctx.name
                );
            } else {
                assert!(result.is_ok(), "{} tx {idx} should commit", ctx.name);
            }
        }
        assert_eq!(ctx.env.receipts().len(), TX_COUNT / 2, "{}", ctx.name);
    }
    assert_contexts_converge(&contexts);
}

#[test]
fn contract_workload_matches_independent_replay() {
    const OBJECTS_PER_SIGNER: usize = 100;

    let mut signers = SignerList::new(3);
    let mut contexts = strategy_contexts(GAS_LIMIT, &signers);
    let vm = HarnessVm::new();
    let mut rng = StdRng::seed_from_u64(0xb10c);

    // one harness contract per signer, then a barrage of createObject
    // calls with random keys and values
    let mut workload = Vec::new();
    let mut expected_contracts = Vec::new();
    for from in 0..signers.addresses.len() {
        expected_contracts.push(create_address(signers.addresses[from], signers.nonces[from]));
        workload.push(signers.sign_tx(
            from,
            200_000,
            1,
            2,
            TxKind::Create,
            U256::ZERO,
            Bytes::from_static(b"harness"),
        ));
    }
    for from in 0..signers.addresses.len() {
        for _ in 0..OBJECTS_PER_SIGNER {
            let key = U256::from_be_bytes(rng.gen::<[u8; 32]>());
            let value = U256::from_be_bytes(rng.gen::<[u8; 32]>());
            workload.push(signers.sign_tx(
                from,
                200_000,
                1,
                2,
                TxKind::Call(expected_contracts[from]),
                U256::ZERO,
                create_object_input(key, value),
            ));
        }
    }

    // independent replay: the bare executor against the same genesis,
    // no commit machinery in between
    let mut reference = genesis_state(&signers);
    let header = test_header(GAS_LIMIT, signers.addresses[0]);
    let chain_signer = crate::primitives::ChainSigner::new(CHAIN_ID);
    for tx in &workload {
        let recovered = chain_signer.recover(tx).unwrap();
        let outcome = crate::evm::Evm::execute(&vm, &mut reference, &header, &recovered).unwrap();
        assert!(outcome.success);
    }
    let reference_root = reference.intermediate_root(true);

    for ctx in &mut contexts {
        for (idx, tx) in workload.iter().enumerate() {
            let (_, result) = ctx.commit_tx(tx, &vm);
            let receipt = result.unwrap();
            assert!(receipt.success, "{} tx {idx}", ctx.name);
            if idx < expected_contracts.len() {
                assert_eq!(
                    receipt.contract_address,
                    Some(expected_contracts[idx]),
                    "{}",
                    ctx.name
                );
            }
        }
        assert_eq!(ctx.root(), reference_root, "{}", ctx.name);
    }
    assert_contexts_converge(&contexts);
}

#[test]
fn randomized_snapshot_round_trips() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let addresses: Vec<Address> = (1u8..=8).map(Address::repeat_byte).collect();

    for _ in 0..50 {
        let mut state = StateDb::new();
        for address in &addresses {
            if rng.gen_bool(0.7) {
                state.set_balance(*address, U256::from(rng.gen::<u64>()));
            }
        }
        let root_before = state.intermediate_root(true);

        state.multi_tx_snapshot().unwrap();
        random_mutations(&mut state, &addresses, &mut rng);

        if rng.gen_bool(0.5) {
            // nested scope that settles before the outer revert
            state.multi_tx_snapshot().unwrap();
            random_mutations(&mut state, &addresses, &mut rng);
            if rng.gen_bool(0.5) {
                state.multi_tx_snapshot_commit();
            } else {
                state.multi_tx_snapshot_revert();
            }
        }

        state.multi_tx_snapshot_revert();
        assert_eq!(state.intermediate_root(true), root_before);
        assert_eq!(state.snapshot_depth(), 0);
    }
}

fn random_mutations(state: &mut StateDb, addresses: &[Address], rng: &mut StdRng) {
    for _ in 0..rng.gen_range(1..20) {
        let address = addresses[rng.gen_range(0..addresses.len())];
        match rng.gen_range(0..5) {
            0 => state.set_balance(address, U256::from(rng.gen::<u64>())),
            1 => state.set_nonce(address, rng.gen::<u32>() as u64),
            2 => state.set_storage(
                address,
                U256::from(rng.gen_range(0u64..4)),
                U256::from(rng.gen::<u64>()),
            ),
            3 => state.self_destruct(address),
            _ => state.create_account(address),
        }
    }
}
