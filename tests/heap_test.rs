use serial_test::serial;
use xbrtime::{Alloc, SymAddr, WorldBuilder, XbrtimeError};

fn overlaps(live: &[(SymAddr, usize)]) -> bool {
    live.iter().enumerate().any(|(i, (a, a_len))| {
        live[i + 1..]
            .iter()
            .any(|(b, b_len)| a.0 < b.0 + b_len && b.0 < a.0 + a_len)
    })
}

macro_rules! heap_tests {
    ($($alloc:ident),*) => {
        $(
            paste::paste! {
                #[test]
                #[serial]
                fn [<alloc_free_sequence_ $alloc:lower>]() {
                    let addrs = WorldBuilder::new()
                        .with_num_pes(4)
                        .with_heap_size(4096)
                        .with_alloc(Alloc::$alloc)
                        .launch(|world| {
                            let mut live = vec![];
                            let a = world.malloc(24).unwrap();
                            live.push((a, 24));
                            let b = world.malloc(56).unwrap();
                            live.push((b, 56));
                            let c = world.malloc(124).unwrap();
                            live.push((c, 124));
                            assert!(!overlaps(&live));
                            world.free(a).unwrap();
                            world.free(b).unwrap();
                            world.free(c).unwrap();
                            let d = world.malloc(241).unwrap();
                            assert_eq!(world.num_allocations(), 1);
                            assert_eq!(world.mem_occupied(), 248);
                            assert_eq!(world.free(a), Err(XbrtimeError::InvalidFree(a)));
                            world.free(d).unwrap();
                            world.close().unwrap();
                            vec![a, b, c, d]
                        })
                        .unwrap();
                    // lockstep allocation gives every pe the same addresses
                    assert!(addrs.windows(2).all(|w| w[0] == w[1]));
                    assert_eq!(addrs[0][3], addrs[0][0]);
                }

                #[test]
                #[serial]
                fn [<heap_exhaustion_ $alloc:lower>]() {
                    let world = WorldBuilder::new()
                        .with_num_pes(1)
                        .with_heap_size(64)
                        .with_alloc(Alloc::$alloc)
                        .with_mem_slots(3)
                        .build()
                        .unwrap();
                    assert_eq!(
                        world.malloc(72),
                        Err(XbrtimeError::OutOfSymmetricMemory { requested: 72 })
                    );
                    let blocks = (0..3).map(|_| world.malloc(8).unwrap()).collect::<Vec<_>>();
                    // room left, but no free slot
                    assert!(matches!(
                        world.malloc(8),
                        Err(XbrtimeError::OutOfSymmetricMemory { .. })
                    ));
                    world.free(blocks[1]).unwrap();
                    assert_eq!(world.malloc(8).unwrap(), blocks[1]);
                    assert!(matches!(world.malloc(0), Err(XbrtimeError::InvalidArgument(_))));
                    world.close().unwrap();
                }

                #[test]
                #[serial]
                fn [<oversized_requests_ $alloc:lower>]() {
                    let world = WorldBuilder::new()
                        .with_num_pes(1)
                        .with_heap_size(4096)
                        .with_alloc(Alloc::$alloc)
                        .build()
                        .unwrap();
                    let a = world.malloc(8).unwrap();
                    for size in [usize::MAX, usize::MAX - 7, usize::MAX - 15] {
                        assert_eq!(
                            world.malloc(size),
                            Err(XbrtimeError::OutOfSymmetricMemory { requested: size })
                        );
                    }
                    // nothing was handed out, so the next block does not alias `a`
                    let b = world.malloc(8).unwrap();
                    assert_ne!(a, b);
                    assert_eq!(world.num_allocations(), 2);
                    world.close().unwrap();
                }
            }
        )*
    };
}

heap_tests!(Btree, Linear);

#[test]
#[serial]
fn remote_data_survives_until_free() {
    let results = WorldBuilder::new()
        .with_num_pes(3)
        .with_heap_size(1024)
        .launch(|world| {
            let addr = world.malloc(16).unwrap();
            world.barrier().unwrap();
            let next = (world.my_pe() + 1) % world.num_pes();
            world.put_slice(next, addr, &[world.my_pe() as u64 + 100], 1).unwrap();
            world.barrier().unwrap();
            let got = world.read_local::<u64>(addr).unwrap();
            world.free(addr).unwrap();
            let again = world.malloc(16).unwrap();
            let zeroed = world.read_local::<u64>(again).unwrap();
            world.close().unwrap();
            (got, zeroed)
        })
        .unwrap();
    for (pe, (got, zeroed)) in results.iter().enumerate() {
        let prev = (pe + results.len() - 1) % results.len();
        assert_eq!(*got, prev as u64 + 100);
        assert_eq!(*zeroed, 0);
    }
}
