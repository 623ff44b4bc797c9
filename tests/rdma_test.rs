use serial_test::serial;
use xbrtime::{MappedArch, Remote, SymAddr, World, WorldBuilder, XbrtimeError};

const LEN: usize = 16;

// pe 0 fills a buffer and puts it to every pe, each pe checks its copy
fn put_from_root<T: Remote>(world: &World, vals: &[T]) -> bool {
    let addr = world.malloc(LEN * std::mem::size_of::<T>()).unwrap();
    if world.my_pe() == 0 {
        world.write_local_slice(addr, vals).unwrap();
    }
    world.barrier().unwrap();
    if world.my_pe() == 0 {
        for pe in 1..world.num_pes() {
            world.put::<T>(pe, addr, addr, vals.len(), 1, 1).unwrap();
        }
    }
    world.barrier().unwrap();
    let ok = world.read_local_slice::<T>(addr, vals.len()).unwrap() == vals;
    world.barrier().unwrap();
    world.free(addr).unwrap();
    ok
}

// every pe pulls from its left neighbour with a source stride
fn strided_get<T: Remote>(world: &World, vals: &[T]) -> bool {
    let size = LEN * std::mem::size_of::<T>();
    let src = world.malloc(size).unwrap();
    let dest = world.malloc(size).unwrap();
    world.write_local_slice(src, vals).unwrap();
    world.barrier().unwrap();
    let left = (world.my_pe() + world.num_pes() - 1) % world.num_pes();
    // every other element of the neighbour into contiguous local slots
    world.get::<T>(dest, left, src, LEN / 2, 1, 2).unwrap();
    let got = world.read_local_slice::<T>(dest, LEN / 2).unwrap();
    let expected = vals.iter().step_by(2).copied().collect::<Vec<_>>();
    world.barrier().unwrap();
    world.free(dest).unwrap();
    world.free(src).unwrap();
    got == expected
}

macro_rules! rdma_tests {
    ($($t:ty),*) => {
        $(
            paste::paste! {
                #[test]
                #[serial]
                fn [<put_get_ $t>]() {
                    let vals = (0..LEN).map(|i| (i as u8 + 1) as $t).collect::<Vec<$t>>();
                    for num_pes in [2, 3, 5] {
                        let results = WorldBuilder::new()
                            .with_num_pes(num_pes)
                            .with_heap_size(1024)
                            .launch(|world| {
                                let ok = put_from_root(&world, &vals) && strided_get(&world, &vals);
                                world.close().unwrap();
                                ok
                            })
                            .unwrap();
                        assert!(results.iter().all(|ok| *ok), "{} pes", num_pes);
                    }
                }
            }
        )*
    };
}

rdma_tests!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64);

#[test]
#[serial]
fn signed_values_round_trip() {
    let results = WorldBuilder::new()
        .with_num_pes(2)
        .with_heap_size(256)
        .launch(|world| {
            let addr = world.malloc(8).unwrap();
            if world.my_pe() == 0 {
                world.write_local_slice(addr, &[-1i8, i8::MIN, 5, -7]).unwrap();
                world.put::<i8>(1, addr, addr, 4, 1, 1).unwrap();
            }
            world.barrier().unwrap();
            let vals = world.read_local_slice::<i8>(addr, 4).unwrap();
            world.close().unwrap();
            vals
        })
        .unwrap();
    assert_eq!(results[1], vec![-1, i8::MIN, 5, -7]);
}

#[test]
#[serial]
fn atomic_swaps_are_linearizable() {
    let num_pes = 8;
    let results = WorldBuilder::new()
        .with_num_pes(num_pes)
        .with_heap_size(256)
        .launch(|world| {
            let addr = world.malloc(8).unwrap();
            world.barrier().unwrap();
            let old = world
                .atomic_swap(addr, 0, world.my_pe() as u64 + 1)
                .unwrap();
            world.barrier().unwrap();
            let last = world.read_local::<u64>(addr).unwrap();
            world.close().unwrap();
            (old, last)
        })
        .unwrap();
    // the swaps chain: every value but the final one was seen exactly once as old
    let mut seen = results.iter().map(|(old, _)| *old).collect::<Vec<_>>();
    seen.push(results[0].1);
    seen.sort();
    assert_eq!(seen, (0..=num_pes as u64).collect::<Vec<_>>());
}

#[test]
#[serial]
fn stats_count_remote_bytes_only() {
    let results = WorldBuilder::new()
        .with_num_pes(2)
        .with_heap_size(256)
        .launch(|world| {
            let addr = world.malloc(32).unwrap();
            world.write_local_slice(addr, &[1u32, 2, 3, 4]).unwrap();
            let before = world.stats();
            let other = 1 - world.my_pe();
            world.put::<u32>(other, addr.elem::<u32>(4), addr, 4, 1, 1).unwrap();
            let mut buf = [0u32; 2];
            world.get_slice(&mut buf, other, addr, 1).unwrap();
            let after = world.stats();
            world.close().unwrap();
            (
                after.bytes_put - before.bytes_put,
                after.bytes_get - before.bytes_get,
            )
        })
        .unwrap();
    assert_eq!(results, vec![(16, 8), (16, 8)]);
}

#[test]
#[serial]
fn errors_surface_on_the_calling_pe() {
    let results = WorldBuilder::new()
        .with_num_pes(3)
        .with_heap_size(256)
        .launch(|world| {
            let addr = world.malloc(8).unwrap();
            let errs = vec![
                world.put::<u64>(3, addr, addr, 1, 1, 1).unwrap_err(),
                world.get::<u64>(addr, 1, addr, 0, 1, 1).unwrap_err(),
                world.put::<u64>(1, addr, addr, 1, 1, 0).unwrap_err(),
                world
                    .get::<u64>(addr, 2, SymAddr(1 << 30), 1, 1, 1)
                    .unwrap_err(),
            ];
            world.close().unwrap();
            errs
        })
        .unwrap();
    for errs in results {
        assert_eq!(errs[0], XbrtimeError::InvalidPe { pe: 3, num_pes: 3 });
        assert!(matches!(errs[1], XbrtimeError::InvalidArgument(_)));
        assert!(matches!(errs[2], XbrtimeError::InvalidArgument(_)));
        assert!(matches!(errs[3], XbrtimeError::UnreachableAddress { .. }));
    }
}

#[test]
#[serial]
fn mapped_topology_routes_by_logical_pe() {
    // logical pes 0 and 3 swap nodes, 1 and 2 stay put
    let arch = MappedArch::new(4, &[(0, 3), (3, 0)], SymAddr(256), 1024).unwrap();
    let results = WorldBuilder::new()
        .with_num_pes(4)
        .with_heap_size(1024)
        .with_arch(arch)
        .launch(|world| {
            let addr = world.malloc(8).unwrap();
            world.barrier().unwrap();
            let next = (world.my_pe() + 1) % world.num_pes();
            world
                .put_slice(next, addr, &[world.my_pe() as u64], 1)
                .unwrap();
            world.barrier().unwrap();
            let from = world.read_local::<u64>(addr).unwrap();
            let outside = world.addr_accessible(SymAddr(8), next);
            world.close().unwrap();
            (from, outside)
        })
        .unwrap();
    for (pe, (from, outside)) in results.iter().enumerate() {
        assert_eq!(*from as usize, (pe + 3) % 4);
        assert!(!outside);
    }
}
