#[cfg(test)]
mod tests {
    use crate::*;
    use cellua_abi::{codes, ChannelId, HashType, ProcessId, Script, ScriptArguments, Source, SpawnArgs};
    use std::sync::{Arc, Mutex};

    struct FnProgram<F>(F);

    impl<F: Fn(&mut dyn HostAbi, Vec<String>) + Send + Sync> Program for FnProgram<F> {
        fn run(&self, mut host: Box<dyn HostAbi>, argv: Vec<String>) {
            (self.0)(host.as_mut(), argv)
        }
    }

    fn program(f: impl Fn(&mut dyn HostAbi, Vec<String>) + Send + Sync + 'static) -> Arc<dyn Program> {
        Arc::new(FnProgram(f))
    }

    fn run_root(machine: &Machine, f: impl Fn(&mut dyn HostAbi, Vec<String>) + Send + Sync + 'static) {
        let code = machine.run(program(f), vec![]).unwrap();
        assert_eq!(code, 0, "root instance failed");
    }

    fn tx_with_deps(deps: &[&[u8]]) -> Transaction {
        let mut tx = Transaction::new(Script::new([0; 32], 0, ScriptArguments::own_cell(0)));
        tx.cell_deps = deps.iter().map(|d| Cell::new(d.to_vec())).collect();
        tx
    }

    fn spawn_dep(host: &mut dyn HostAbi, index: u64, argv: &[&str], inherited: &[u64]) -> (u64, u64) {
        let args = SpawnArgs {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            inherited: inherited.iter().map(|fd| ChannelId(*fd)).collect(),
        };
        let mut pid = 0;
        let code = host.spawn(index, Source::CellDep.raw(), 0, 0, &args, &mut pid);
        (code, pid)
    }

    #[test]
    fn test_root_exit_code() {
        let machine = Machine::new(tx_with_deps(&[]));
        let code = machine
            .run(
                program(|host, _| {
                    assert_eq!(host.process_id(), 0);
                    host.exit(7);
                    host.exit(9);
                }),
                vec![],
            )
            .unwrap();
        assert_eq!(code, 7);
        let log = machine.log();
        assert_eq!(log.count(|e| matches!(e, Event::Exit { .. })), 1);
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let machine = Machine::new(tx_with_deps(&[]));
        machine.run(program(|host, _| host.exit(0)), vec![]).unwrap();
        assert!(matches!(
            machine.run(program(|host, _| host.exit(0)), vec![]),
            Err(MachineError::AlreadyRun)
        ));
    }

    #[test]
    fn test_missing_exit_and_panic_are_aborts() {
        let machine = Machine::new(tx_with_deps(&[]));
        assert_eq!(machine.run(program(|_, _| {}), vec![]).unwrap(), -1);

        let machine = Machine::new(tx_with_deps(&[]));
        let code = machine
            .run(program(|_, _| panic!("instance blew up")), vec![])
            .unwrap();
        assert_eq!(code, -1);
        assert!(machine
            .log()
            .events()
            .iter()
            .any(|e| matches!(e, Event::Terminated { aborted: true, .. })));
    }

    #[test]
    fn test_load_script_reports_full_length() {
        let tx = tx_with_deps(&[]);
        let expected = tx.script.to_bytes();
        let machine = Machine::new(tx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        run_root(&machine, move |host, _| {
            let mut small = [0u8; 8];
            let mut len = small.len() as u64;
            assert_eq!(host.load_script(&mut small, &mut len, 0), codes::SUCCESS);
            let mut full = vec![0u8; len as usize];
            let mut len = full.len() as u64;
            assert_eq!(host.load_script(&mut full, &mut len, 0), codes::SUCCESS);
            assert_eq!(&full[..8], &small);
            *out.lock().unwrap() = full;
            let mut len = 4;
            assert_eq!(host.load_script(&mut small, &mut len, 10_000), codes::SLICE_OUT_OF_BOUND);
            host.exit(0);
        });
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn test_find_dependency_matching() {
        let code = b"lua code".to_vec();
        let mut tx = tx_with_deps(&[b"other", code.as_slice(), code.as_slice()]);
        tx.cell_deps.push(Cell::new(b"typed".to_vec()).with_type_hash([0x77; 32]));
        let machine = Machine::new(tx);
        let code_hash = data_hash(&code);
        run_root(&machine, move |host, _| {
            let mut index = 99;
            for ht in [HashType::Data, HashType::Data1, HashType::Data2] {
                assert_eq!(host.find_dependency_by_hash(&code_hash, ht.as_u8(), &mut index), codes::SUCCESS);
                assert_eq!(index, 1, "first match wins");
            }
            assert_eq!(
                host.find_dependency_by_hash(&code_hash, HashType::Type.as_u8(), &mut index),
                codes::ITEM_MISSING
            );
            assert_eq!(host.find_dependency_by_hash(&[0x77; 32], HashType::Type.as_u8(), &mut index), codes::SUCCESS);
            assert_eq!(index, 3);
            assert_eq!(host.find_dependency_by_hash(&code_hash, 3, &mut index), codes::WRONG_FORMAT);
            host.exit(0);
        });
    }

    #[test]
    fn test_load_cell_data_sources() {
        let mut tx = tx_with_deps(&[b"dep"]);
        tx.inputs = vec![Cell::new(b"in0".to_vec()), Cell::new(b"in1".to_vec())];
        tx.group_inputs = vec![1];
        let machine = Machine::new(tx);
        run_root(&machine, |host, _| {
            let mut buf = [0u8; 16];
            let mut len = buf.len() as u64;
            assert_eq!(
                host.load_cell_data(&mut buf, &mut len, 0, 0, Source::GroupInput.raw()),
                codes::SUCCESS
            );
            assert_eq!(&buf[..len as usize], b"in1");
            let mut len = buf.len() as u64;
            assert_eq!(
                host.load_cell_data(&mut buf, &mut len, 0, 0, Source::GroupOutput.raw()),
                codes::INDEX_OUT_OF_BOUND
            );
            let mut len = buf.len() as u64;
            assert_eq!(host.load_cell_data(&mut buf, &mut len, 0, 0, 77), codes::INDEX_OUT_OF_BOUND);
            host.exit(0);
        });
    }

    #[test]
    fn test_spawn_pipe_and_wait() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        machine.install(
            b"child",
            program(|host, argv| {
                assert_eq!(host.process_id(), 1);
                let mut fds = [0u64; 4];
                let mut len = fds.len() as u64;
                assert_eq!(host.inherited_fds(&mut fds, &mut len), codes::SUCCESS);
                assert_eq!(len, 1);
                let message = argv.concat();
                let mut n = message.len() as u64;
                assert_eq!(host.write(fds[0], message.as_bytes(), &mut n), codes::SUCCESS);
                host.exit(3);
            }),
        );
        let received = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&received);
        run_root(&machine, move |host, _| {
            let mut fds = [0u64; 2];
            assert_eq!(host.pipe(&mut fds), codes::SUCCESS);
            assert_eq!(fds, [2, 3]);
            let (code, pid) = spawn_dep(host, 0, &["hello", "world"], &[fds[1]]);
            assert_eq!(code, codes::SUCCESS);
            assert_eq!(pid, 1);
            let mut buf = [0u8; 64];
            loop {
                let mut len = buf.len() as u64;
                match host.read(fds[0], &mut buf, &mut len) {
                    codes::SUCCESS => out.lock().unwrap().extend_from_slice(&buf[..len as usize]),
                    codes::OTHER_END_CLOSED => break,
                    other => panic!("read failed with {other}"),
                }
            }
            let mut exit_code = 0;
            assert_eq!(host.wait(pid, &mut exit_code), codes::SUCCESS);
            assert_eq!(exit_code, 3);
            assert_eq!(host.wait(pid, &mut exit_code), codes::WAIT_FAILURE);
            assert_eq!(host.wait(42, &mut exit_code), codes::WAIT_FAILURE);
            host.exit(0);
        });
        assert_eq!(&*received.lock().unwrap(), b"helloworld");
        assert_eq!(machine.exit_code(ProcessId(1)), Some(3));
        let log = machine.log();
        assert!(log.events().contains(&Event::Handoff { from: 0, to: 1 }));
    }

    #[test]
    fn test_inherited_end_moves_to_child() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        machine.install(b"child", program(|host, _| host.exit(0)));
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            assert_eq!(spawn_dep(host, 0, &[], &[fds[1]]).0, codes::SUCCESS);
            let mut len = 1;
            assert_eq!(host.write(fds[1], b"x", &mut len), codes::INVALID_FD);
            assert_eq!(host.close(fds[1]), codes::INVALID_FD);
            // The end is gone, so it cannot be handed over twice.
            assert_eq!(spawn_dep(host, 0, &[], &[fds[1]]).0, codes::INVALID_FD);
            assert_eq!(spawn_dep(host, 0, &[], &[fds[0], fds[0]]).0, codes::INVALID_FD);
            host.exit(0);
        });
    }

    #[test]
    fn test_deadlock_reports_would_block() {
        let machine = Machine::new(tx_with_deps(&[]));
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            let mut buf = [0u8; 4];
            let mut len = 4;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::WOULD_BLOCK);
            assert_eq!(len, 0);
            host.exit(0);
        });
    }

    #[test]
    fn test_write_is_partial_when_pipe_fills() {
        let config = MachineConfig { pipe_capacity: 8, ..MachineConfig::default() };
        let machine = Machine::with_config(tx_with_deps(&[]), config);
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            let mut len = 12;
            assert_eq!(host.write(fds[1], b"0123456789ab", &mut len), codes::SUCCESS);
            assert_eq!(len, 8);
            let mut len = 1;
            assert_eq!(host.write(fds[1], b"c", &mut len), codes::WOULD_BLOCK);
            let mut buf = [0u8; 5];
            let mut len = 5;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::SUCCESS);
            assert_eq!(&buf, b"01234");
            host.exit(0);
        });
    }

    fn write_all(host: &mut dyn HostAbi, fd: u64, mut data: &[u8]) {
        while !data.is_empty() {
            let mut len = data.len() as u64;
            assert_eq!(host.write(fd, data, &mut len), codes::SUCCESS);
            data = &data[len as usize..];
        }
    }

    fn read_to_end(host: &mut dyn HostAbi, fd: u64, chunk: usize) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let mut len = buf.len() as u64;
            match host.read(fd, &mut buf, &mut len) {
                codes::SUCCESS => received.extend_from_slice(&buf[..len as usize]),
                codes::OTHER_END_CLOSED => return received,
                other => panic!("read failed with {other}"),
            }
        }
    }

    #[test]
    fn test_child_writes_more_than_pipe_capacity() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        machine.install(
            b"child",
            program(|host, _| {
                let mut fds = [0u64; 1];
                let mut len = 1;
                host.inherited_fds(&mut fds, &mut len);
                write_all(host, fds[0], &[7u8; 5000]);
                host.close(fds[0]);
                host.exit(0);
            }),
        );
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            let (_, pid) = spawn_dep(host, 0, &[], &[fds[1]]);
            let received = read_to_end(host, fds[0], 1000);
            assert_eq!(received.len(), 5000);
            assert!(received.iter().all(|b| *b == 7));
            let mut exit_code = -1;
            assert_eq!(host.wait(pid, &mut exit_code), codes::SUCCESS);
            assert_eq!(exit_code, 0);
            host.exit(0);
        });
        let log = machine.log();
        assert!(log.count(|e| matches!(e, Event::Handoff { from: 1, to: 0 })) >= 1);
    }

    #[test]
    fn test_parent_writes_more_than_pipe_capacity() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        let counted = Arc::new(Mutex::new(0usize));
        let out = Arc::clone(&counted);
        machine.install(
            b"child",
            program(move |host, _| {
                let mut fds = [0u64; 1];
                let mut len = 1;
                host.inherited_fds(&mut fds, &mut len);
                *out.lock().unwrap() = read_to_end(host, fds[0], 300).len();
                host.exit(0);
            }),
        );
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            let (_, pid) = spawn_dep(host, 0, &[], &[fds[0]]);
            write_all(host, fds[1], &[1u8; 10_000]);
            assert_eq!(host.close(fds[1]), codes::SUCCESS);
            let mut exit_code = -1;
            assert_eq!(host.wait(pid, &mut exit_code), codes::SUCCESS);
            assert_eq!(exit_code, 0);
            host.exit(0);
        });
        assert_eq!(*counted.lock().unwrap(), 10_000);
    }

    #[test]
    fn test_parked_instance_is_unwound_when_root_exits() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        machine.install(
            b"child",
            program(|host, _| {
                let mut fds = [0u64; 1];
                let mut len = 1;
                host.inherited_fds(&mut fds, &mut len);
                // The writer never closes, so this parks once the data is drained.
                read_to_end(host, fds[0], 512);
                host.exit(0);
            }),
        );
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            spawn_dep(host, 0, &[], &[fds[0]]);
            write_all(host, fds[1], &[0u8; 5000]);
            host.exit(0);
        });
        assert_eq!(machine.exit_code(ProcessId(1)), None);
        let log = machine.log();
        assert_eq!(log.count(|e| matches!(e, Event::Terminated { .. })), 1);
    }

    #[test]
    fn test_closed_ends() {
        let machine = Machine::new(tx_with_deps(&[]));
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            let mut len = 2;
            host.write(fds[1], b"hi", &mut len);
            assert_eq!(host.close(fds[1]), codes::SUCCESS);
            assert_eq!(host.close(fds[1]), codes::OTHER_END_CLOSED);
            let mut buf = [0u8; 8];
            let mut len = 8;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::SUCCESS);
            assert_eq!(len, 2);
            let mut len = 8;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::OTHER_END_CLOSED);
            assert_eq!(host.close(fds[0]), codes::SUCCESS);
            let mut len = 8;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::OTHER_END_CLOSED);
            host.exit(0);
        });
    }

    #[test]
    fn test_process_limit() {
        let config = MachineConfig { max_processes: 3, ..MachineConfig::default() };
        let machine = Machine::with_config(tx_with_deps(&[b"child"]), config);
        machine.install(b"child", program(|host, _| host.exit(0)));
        run_root(&machine, |host, _| {
            assert_eq!(spawn_dep(host, 0, &[], &[]).0, codes::SUCCESS);
            assert_eq!(spawn_dep(host, 0, &[], &[]).0, codes::SUCCESS);
            assert_eq!(spawn_dep(host, 0, &[], &[]).0, codes::MAX_VMS_SPAWNED);
            assert_eq!(spawn_dep(host, 5, &[], &[]).0, codes::MAX_VMS_SPAWNED);
            host.exit(0);
        });
        assert_eq!(machine.process_count(), 3);
    }

    #[test]
    fn test_spawn_rejects_unknown_code_and_bad_bounds() {
        let machine = Machine::new(tx_with_deps(&[b"not a program"]));
        run_root(&machine, |host, _| {
            let args = SpawnArgs::default();
            let mut pid = 0;
            let dep = Source::CellDep.raw();
            assert_eq!(host.spawn(0, dep, 0, 0, &args, &mut pid), codes::WRONG_FORMAT);
            assert_eq!(host.spawn(4, dep, 0, 0, &args, &mut pid), codes::INDEX_OUT_OF_BOUND);
            let bounds = cellua_abi::Bounds::new(100, 0).raw();
            assert_eq!(host.spawn(0, dep, 0, bounds, &args, &mut pid), codes::SLICE_OUT_OF_BOUND);
            host.exit(0);
        });
    }

    #[test]
    fn test_exit_closes_owned_channels() {
        let machine = Machine::new(tx_with_deps(&[b"child"]));
        // Child exits without closing its end; the reader must still see EOF.
        machine.install(
            b"child",
            program(|host, _| {
                let mut fds = [0u64; 1];
                let mut len = 1;
                host.inherited_fds(&mut fds, &mut len);
                let mut n = 3;
                host.write(fds[0], b"abc", &mut n);
                host.exit(0);
            }),
        );
        run_root(&machine, |host, _| {
            let mut fds = [0u64; 2];
            host.pipe(&mut fds);
            spawn_dep(host, 0, &[], &[fds[1]]);
            let mut buf = [0u8; 8];
            let mut len = 8;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::SUCCESS);
            assert_eq!(&buf[..len as usize], b"abc");
            let mut len = 8;
            assert_eq!(host.read(fds[0], &mut buf, &mut len), codes::OTHER_END_CLOSED);
            host.exit(0);
        });
    }

    #[test]
    fn test_local_file() {
        let machine = Machine::new(tx_with_deps(&[]));
        machine.set_local_file(b"return 1".to_vec());
        run_root(&machine, |host, _| {
            let mut buf = [0u8; 4];
            assert_eq!(host.read_local_file(&mut buf), 4);
            assert_eq!(&buf, b"retu");
            host.exit(0);
        });

        let machine = Machine::new(tx_with_deps(&[]));
        run_root(&machine, |host, _| {
            assert!(host.read_local_file(&mut [0u8; 4]) < 0);
            host.exit(0);
        });
    }

    #[test]
    fn test_verify_runs_script_code() {
        let loader = b"loader binary".to_vec();
        let args = ScriptArguments::own_cell(0);
        let mut tx = tx_with_deps(&[b"unrelated", loader.as_slice()]);
        tx.script = Script::new(data_hash(&loader), HashType::Data1.as_u8(), args);
        let machine = Machine::new(tx);
        machine.install(&loader, program(|host, argv| {
            assert!(argv.is_empty());
            host.exit(5);
        }));
        assert_eq!(machine.verify().unwrap(), 5);
    }

    #[test]
    fn test_verify_errors() {
        let machine = Machine::new(tx_with_deps(&[b"x"]));
        assert!(matches!(machine.verify(), Err(MachineError::ScriptCodeNotFound { .. })));

        let mut tx = tx_with_deps(&[b"x"]);
        tx.script.code_hash = data_hash(b"x");
        let machine = Machine::new(tx);
        assert!(matches!(machine.verify(), Err(MachineError::ProgramNotInstalled(_))));
    }

    #[test]
    fn test_transaction_json_fixture() {
        let json = r#"{
            "script": { "code_hash": "0x0000000000000000000000000000000000000000000000000000000000000000",
                        "hash_type": 2, "args": "0x0000" },
            "cell_deps": [ { "data": "0x6869" },
                           { "data": "0x", "type_hash": "0x1111111111111111111111111111111111111111111111111111111111111111" } ],
            "witnesses": [ "0xff" ]
        }"#;
        let tx = Transaction::from_json(json).unwrap();
        assert_eq!(tx.cell_deps[0].data, b"hi");
        assert_eq!(tx.cell_deps[1].type_hash, Some([0x11; 32]));
        assert_eq!(tx.witness(Source::Input, 0), Some(&[0xff][..]));
        assert!(tx.inputs.is_empty());
        let back = Transaction::from_json(&tx.to_json().unwrap()).unwrap();
        assert_eq!(back, tx);
        assert!(Transaction::from_json(r#"{ "script": 1 }"#).is_err());
    }

    #[test]
    fn test_event_log_json_and_divergence() {
        let run = || {
            let machine = Machine::new(tx_with_deps(&[]));
            run_root(&machine, |host, _| {
                host.debug("hello operator");
                host.exit(0);
            });
            machine.log()
        };
        let first = run();
        let second = run();
        assert_eq!(first.divergence(&second), None);
        assert_eq!(first.debug_messages(0), vec!["hello operator"]);

        let restored = EventLog::from_json(&first.to_json().unwrap()).unwrap();
        assert_eq!(restored.events(), first.events());

        let mut longer = first.clone();
        longer.record(Event::Debug { pid: 0, message: "extra".into() });
        assert_eq!(first.divergence(&longer), Some(first.events().len()));

        let future = r#"{"version": 9, "events": []}"#;
        assert!(EventLog::from_json(future).is_err());
    }
}
