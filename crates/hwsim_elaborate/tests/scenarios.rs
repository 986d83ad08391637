//! End-to-end scenarios: build IR, elaborate, simulate.

use hwsim_elaborate::{elaborate, ElabError, ElabSettings, Elaborated, TopBindings};
use hwsim_ir::{
    AugOp, BinOp, Builtin, ChannelType, ComponentBuilder, Context, DataType, Expr, Field, Function,
    FunctionBuilder, MemoryType, ProtocolType, RegFileType, RegisterDecl, Stmt,
};
use hwsim_sim::{
    Channel, Handle, SimError, SimOptions, Simulation, Storage, Value, FS_PER_NS,
};

fn build(ir: &Context, top: &str) -> Elaborated {
    match elaborate(ir, top, TopBindings::new(), ElabSettings::default()) {
        Ok(e) => e,
        Err(errs) => panic!("elaboration failed: {errs}"),
    }
}

fn errors_of(ir: &Context, top: &str, bindings: TopBindings) -> Vec<ElabError> {
    match elaborate(ir, top, bindings, ElabSettings::default()) {
        Ok(_) => panic!("elaboration of {top} should fail"),
        Err(errs) => errs.into_vec(),
    }
}

fn started(e: Elaborated) -> Simulation {
    let sim = e.into_simulation(SimOptions::default()).unwrap();
    sim.start().unwrap();
    sim
}

fn ret(value: Expr) -> Stmt {
    Stmt::Return(Some(value))
}

fn awaited_call(obj: Expr, method: &str, args: Vec<Expr>) -> Expr {
    Expr::awaited(Expr::method_call(obj, method, args))
}

// ---- registers and comb logic ----

fn register_design() -> Context {
    let mut ir = Context::new();
    let mut reg = ComponentBuilder::new("Reg");
    let clk = reg.input("clock", 1);
    let d = reg.input("d", 8);
    let q = reg.output("q", 8);
    reg.sync("latch", clk, None, vec![Stmt::assign(Expr::field(q), Expr::field(d))]);
    ir.add_type(reg.build()).unwrap();

    let mut top = ComponentBuilder::new("Top");
    let clock = top.input("clock", 1);
    let a_in = top.add(Field::new("a_in", DataType::uint(8)).with_init(Expr::int(3)));
    let b_in = top.add(Field::new("b_in", DataType::uint(8)).with_init(Expr::int(4)));
    let ra = top.instance("reg_a", "Reg");
    let rb = top.instance("reg_b", "Reg");
    let sum = top.output("sum", 9);
    top.bind(Expr::child_field(ra, clk), Expr::field(clock))
        .bind(Expr::child_field(rb, clk), Expr::field(clock))
        .bind(Expr::child_field(ra, d), Expr::field(a_in))
        .bind(Expr::child_field(rb, d), Expr::field(b_in));
    top.comb(
        "add",
        vec![Stmt::assign(
            Expr::field(sum),
            Expr::bin(Expr::child_field(ra, q), BinOp::Add, Expr::child_field(rb, q)),
        )],
    );
    ir.add_type(top.build()).unwrap();
    ir
}

#[test]
fn comb_sum_follows_registers_after_one_edge() {
    let ir = register_design();
    let sim = started(build(&ir, "Top"));
    assert_eq!(sim.get_output("sum"), Ok(Value::Int(0)));
    assert_eq!(sim.read_path("reg_a.d"), Ok(Value::Int(3)));

    sim.drive_clock("clock", 10 * FS_PER_NS).unwrap();
    sim.run_until(12 * FS_PER_NS).unwrap();
    assert_eq!(sim.read_path("reg_a.q"), Ok(Value::Int(3)));
    assert_eq!(sim.get_output("sum"), Ok(Value::Int(7)));
}

#[test]
fn bind_order_is_recorded() {
    let ir = register_design();
    let e = build(&ir, "Top");
    assert_eq!(
        e.tree.bind_order(),
        [
            "Top.reg_a.clock <- Top.clock",
            "Top.reg_b.clock <- Top.clock",
            "Top.reg_a.d <- Top.a_in",
            "Top.reg_b.d <- Top.b_in",
        ]
    );
}

#[test]
fn top_bindings_set_root_inputs() {
    let ir = register_design();
    let mut bindings = TopBindings::new();
    bindings.insert("a_in".into(), Value::Int(10));
    let e = elaborate(&ir, "Top", bindings, ElabSettings::default()).unwrap();
    let sim = started(e);
    sim.clock_edge("clock").unwrap();
    assert_eq!(sim.get_output("sum"), Ok(Value::Int(14)));
}

// ---- bind violations ----

#[test]
fn output_to_output_on_a_comb_component_is_rejected() {
    let mut ir = Context::new();
    let mut src = ComponentBuilder::new("Src");
    let out = src.output("out", 8);
    src.comb("drive", vec![Stmt::assign(Expr::field(out), Expr::int(1))]);
    ir.add_type(src.build()).unwrap();

    let mut top = ComponentBuilder::new("Top");
    let own = top.output("out", 8);
    let child = top.instance("src", "Src");
    top.comb("own", vec![Stmt::assign(Expr::field(own), Expr::int(2))]);
    top.bind(Expr::field(own), Expr::child_field(child, out));
    ir.add_type(top.build()).unwrap();

    let errors = errors_of(&ir, "Top", TopBindings::new());
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ElabError::BindViolation { component, reason } => {
            assert_eq!(component, "Top");
            assert!(reason.contains("Top.out"), "{reason}");
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn every_violation_is_reported() {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    let n = top.constant("N", 4);
    let x = top.signal("x", 8);
    top.bind(Expr::int(1), Expr::field(x))
        .bind(Expr::field(n), Expr::field(x))
        .bind(Expr::field(x), Expr::field(17));
    ir.add_type(top.build()).unwrap();

    let errors = errors_of(&ir, "Top", TopBindings::new());
    assert_eq!(errors.len(), 3, "{errors:?}");
    assert!(matches!(&errors[0], ElabError::BindViolation { reason, .. } if reason.contains("literal")));
    assert!(matches!(&errors[1], ElabError::BindViolation { reason, .. } if reason.contains("constant 'N'")));
    assert!(matches!(&errors[2], ElabError::UnknownField { .. }));
}

#[test]
fn unknown_top_is_reported() {
    let ir = Context::new();
    let errors = errors_of(&ir, "Nowhere", TopBindings::new());
    assert_eq!(errors[0].to_string(), "unknown type 'Nowhere'");
}

// ---- ports, channels and processes ----

fn u8_chan() -> Box<DataType> {
    Box::new(DataType::uint(8))
}

fn port_design() -> Context {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    top.port("req", DataType::GetIf { element_type: u8_chan() });
    top.port("rsp", DataType::PutIf { element_type: u8_chan() });
    top.output("busy", 1);
    ir.add_type(top.build()).unwrap();
    ir
}

#[test]
fn unbound_top_ports_are_listed_together() {
    let ir = port_design();
    let errors = errors_of(&ir, "Top", TopBindings::new());
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].to_string(),
        "unbound top-level ports on 'Top': req, rsp"
    );
}

#[test]
fn top_bindings_resolve_root_ports() {
    let ir = port_design();
    let chan = Channel::new(0);
    let mut bindings = TopBindings::new();
    bindings.insert("req".into(), Value::Obj(Handle::Channel(chan.clone())));
    bindings.insert("rsp".into(), Value::Obj(Handle::Channel(chan)));
    let e = elaborate(&ir, "Top", bindings, ElabSettings::default()).unwrap();
    let root = e.tree.comp(e.tree.root());
    let kinds: Vec<&str> = root.fields[..2]
        .iter()
        .map(|f| match &f.storage {
            Storage::Object(v) => v.type_name(),
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["get port", "put port"]);
}

#[test]
fn unknown_top_binding_is_an_error() {
    let ir = register_design();
    let mut bindings = TopBindings::new();
    bindings.insert("nope".into(), Value::Int(1));
    let errors = errors_of(&ir, "Top", bindings);
    assert!(matches!(&errors[0], ElabError::UnknownField { field, .. } if field == "nope"));
}

fn pipe_design() -> Context {
    let mut ir = Context::new();

    let mut producer = ComponentBuilder::new("Producer");
    let out = producer.port("out", DataType::PutIf { element_type: u8_chan() });
    producer.process(
        "run",
        vec![Stmt::for_each(
            Expr::local("i"),
            Expr::builtin(Builtin::Range, vec![Expr::int(1), Expr::int(4)]),
            vec![Stmt::expr(awaited_call(Expr::field(out), "put", vec![Expr::local("i")]))],
        )],
    );
    ir.add_type(producer.build()).unwrap();

    let mut consumer = ComponentBuilder::new("Consumer");
    let inp = consumer.port("inp", DataType::GetIf { element_type: u8_chan() });
    let seq = consumer.signal("seq", 16);
    consumer.process(
        "run",
        vec![Stmt::for_each(
            Expr::local("n"),
            Expr::builtin(Builtin::Range, vec![Expr::int(3)]),
            vec![
                Stmt::assign(Expr::local("v"), awaited_call(Expr::field(inp), "get", vec![])),
                Stmt::assign(
                    Expr::field(seq),
                    Expr::bin(
                        Expr::bin(Expr::field(seq), BinOp::Mult, Expr::int(10)),
                        BinOp::Add,
                        Expr::local("v"),
                    ),
                ),
            ],
        )],
    );
    consumer.function(
        FunctionBuilder::new("peek")
            .body(vec![ret(Expr::method_call(Expr::field(inp), "try_get", vec![]))])
            .build(),
    );
    ir.add_type(consumer.build()).unwrap();

    let mut top = ComponentBuilder::new("Top");
    let chan = top.add(Field::new(
        "chan",
        DataType::Channel(ChannelType {
            element_type: u8_chan(),
            depth: 1,
        }),
    ));
    let prod = top.instance("prod", "Producer");
    let cons = top.instance("cons", "Consumer");
    top.bind(Expr::child_field(prod, out), Expr::field(chan))
        .bind(Expr::child_field(cons, inp), Expr::field(chan));
    ir.add_type(top.build()).unwrap();
    ir
}

#[test]
fn channel_delivers_in_put_order() {
    let ir = pipe_design();
    let sim = started(build(&ir, "Top"));
    sim.run_until(100 * FS_PER_NS).unwrap();
    assert_eq!(sim.read_path("cons.seq"), Ok(Value::Int(123)));
    assert_eq!(sim.call("cons", "peek", vec![]), Ok(Value::None));
}

#[test]
fn forwarded_ports_receive_the_channel() {
    let mut ir = Context::new();
    let mut leaf = ComponentBuilder::new("Leaf");
    let lp = leaf.port("p", DataType::GetIf { element_type: u8_chan() });
    ir.add_type(leaf.build()).unwrap();

    let mut mid = ComponentBuilder::new("Mid");
    let mp = mid.port("p", DataType::GetIf { element_type: u8_chan() });
    let l = mid.instance("leaf", "Leaf");
    mid.bind(Expr::child_field(l, lp), Expr::field(mp));
    ir.add_type(mid.build()).unwrap();

    let mut top = ComponentBuilder::new("Top");
    let chan = top.add(Field::new(
        "chan",
        DataType::Channel(ChannelType {
            element_type: u8_chan(),
            depth: 0,
        }),
    ));
    let m = top.instance("mid", "Mid");
    top.bind(Expr::child_field(m, mp), Expr::field(chan));
    ir.add_type(top.build()).unwrap();

    let e = build(&ir, "Top");
    let leaf = e.tree.find("mid.leaf").unwrap();
    match &e.tree.comp(leaf).fields[0].storage {
        Storage::Object(v) => assert_eq!(v.type_name(), "get port"),
        other => panic!("leaf port not bound: {other:?}"),
    }
}

#[test]
fn simultaneous_waits_resume_in_start_order() {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    let order = top.signal("order", 16);
    for k in 1..=3 {
        top.process(
            &format!("p{k}"),
            vec![
                Stmt::expr(awaited_call(Expr::RefSelf, "wait", vec![Expr::int(10)])),
                Stmt::assign(
                    Expr::field(order),
                    Expr::bin(
                        Expr::bin(Expr::field(order), BinOp::Mult, Expr::int(10)),
                        BinOp::Add,
                        Expr::int(k),
                    ),
                ),
            ],
        );
    }
    ir.add_type(top.build()).unwrap();
    let sim = started(build(&ir, "Top"));
    sim.run_until(20 * FS_PER_NS).unwrap();
    assert_eq!(sim.get_output("order"), Ok(Value::Int(123)));
}

// ---- events and interfaces ----

#[test]
fn event_callback_runs_on_set() {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    let ev = top.add(Field::new("ev", DataType::Event));
    let hits = top.signal("hits", 8);
    top.function(
        FunctionBuilder::new("on_fire")
            .body(vec![Stmt::aug_assign(
                Expr::field(hits),
                AugOp::Add,
                Expr::int(1),
            )])
            .build(),
    );
    top.bind(Expr::attr(Expr::field(ev), "at"), Expr::attr(Expr::RefSelf, "on_fire"));
    top.process(
        "fire",
        vec![
            Stmt::expr(awaited_call(Expr::RefSelf, "wait", vec![Expr::int(5)])),
            Stmt::expr(Expr::method_call(Expr::field(ev), "set", vec![])),
        ],
    );
    ir.add_type(top.build()).unwrap();

    let e = build(&ir, "Top");
    assert_eq!(e.tree.event_hookups().len(), 1);
    let sim = started(e);
    sim.run_until(20 * FS_PER_NS).unwrap();
    assert_eq!(sim.get_output("hits"), Ok(Value::Int(1)));
}

fn api() -> DataType {
    DataType::Protocol(ProtocolType {
        name: "Api".into(),
        methods: vec![Function::new("double")],
    })
}

#[test]
fn port_calls_reach_exported_methods() {
    let mut ir = Context::new();
    let mut server = ComponentBuilder::new("Server");
    let export = server.export("api", api());
    server.function(
        FunctionBuilder::new("twice")
            .param("x")
            .body(vec![ret(Expr::bin(Expr::param("x", 0), BinOp::Mult, Expr::int(2)))])
            .build(),
    );
    server.bind(
        Expr::attr(Expr::field(export), "double"),
        Expr::attr(Expr::RefSelf, "twice"),
    );
    ir.add_type(server.build()).unwrap();

    let mut client = ComponentBuilder::new("Client");
    let port = client.port("api", api());
    client.function(
        FunctionBuilder::new("go")
            .param("x")
            .body(vec![ret(Expr::method_call(
                Expr::field(port),
                "double",
                vec![Expr::param("x", 0)],
            ))])
            .build(),
    );
    ir.add_type(client.build()).unwrap();

    let mut top = ComponentBuilder::new("Top");
    let srv = top.instance("srv", "Server");
    let cli = top.instance("cli", "Client");
    top.bind(Expr::child_field(cli, port), Expr::child_field(srv, export));
    ir.add_type(top.build()).unwrap();

    let sim = started(build(&ir, "Top"));
    assert_eq!(sim.call("cli", "go", vec![Value::Int(21)]), Ok(Value::Int(42)));
}

#[test]
fn interface_members_must_exist_on_the_protocol() {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    let export = top.export("api", api());
    top.function(FunctionBuilder::new("twice").build());
    top.bind(
        Expr::attr(Expr::field(export), "triple"),
        Expr::attr(Expr::RefSelf, "twice"),
    );
    ir.add_type(top.build()).unwrap();
    let errors = errors_of(&ir, "Top", TopBindings::new());
    assert!(matches!(&errors[0], ElabError::BindViolation { reason, .. } if reason.contains("no method 'triple'")));
}

// ---- address spaces ----

fn soc_design(regs_base: i128) -> Context {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Soc");
    let mem = top.add(Field::new(
        "mem",
        DataType::Memory(MemoryType {
            element_type: Box::new(DataType::uint(32)),
            size: 16,
        }),
    ));
    let regs = top.add(Field::new(
        "regs",
        DataType::RegFile(RegFileType {
            name: "Ctrl".into(),
            registers: vec![
                RegisterDecl {
                    name: "ctrl".into(),
                    bits: 32,
                    offset: None,
                },
                RegisterDecl {
                    name: "status".into(),
                    bits: 32,
                    offset: None,
                },
            ],
        }),
    ));
    let bus = top.add(Field::new("bus", DataType::AddressSpace));
    top.bind(
        Expr::attr(Expr::field(bus), "mmap"),
        Expr::tuple(vec![
            Expr::builtin(Builtin::At, vec![Expr::int(0x1000), Expr::field(mem)]),
            Expr::builtin(Builtin::At, vec![Expr::int(regs_base), Expr::field(regs)]),
        ]),
    );
    top.function(
        FunctionBuilder::new("poke")
            .param("addr")
            .param("value")
            .body(vec![
                Stmt::expr(Expr::method_call(
                    Expr::field(bus),
                    "write",
                    vec![Expr::param("addr", 0), Expr::param("value", 1), Expr::int(4)],
                )),
                ret(Expr::method_call(
                    Expr::field(bus),
                    "read",
                    vec![Expr::param("addr", 0), Expr::int(4)],
                )),
            ])
            .build(),
    );
    ir.add_type(top.build()).unwrap();
    ir
}

#[test]
fn address_space_round_trip() {
    let ir = soc_design(0x2000);
    let e = build(&ir, "Soc");
    let map = e.tree.region_map();
    assert_eq!(map.len(), 1);
    assert_eq!(map[0].0, "Soc.bus");
    let bases: Vec<(u64, u64)> = map[0].1.iter().map(|r| (r.base, r.size)).collect();
    assert_eq!(bases, [(0x1000, 64), (0x2000, 8)]);

    let sim = started(e);
    for addr in [0x1000, 0x1004, 0x103c, 0x2004] {
        assert_eq!(
            sim.call("Soc", "poke", vec![Value::Int(addr), Value::Int(0xdead_beef)]),
            Ok(Value::Int(0xdead_beef)),
            "at 0x{addr:x}"
        );
    }
}

#[test]
fn address_space_access_errors() {
    let ir = soc_design(0x2000);
    let sim = started(build(&ir, "Soc"));
    assert_eq!(
        sim.call("Soc", "poke", vec![Value::Int(0x103e), Value::Int(1)]),
        Err(SimError::RegionBoundaryCrossed {
            addr: 0x103e,
            size: 4,
            boundary: 0x1040,
        })
    );
    assert_eq!(
        sim.call("Soc", "poke", vec![Value::Int(0x3000), Value::Int(1)]),
        Err(SimError::AddressNotMapped { addr: 0x3000 })
    );
}

#[test]
fn overlapping_regions_are_rejected() {
    let ir = soc_design(0x1020);
    let errors = errors_of(&ir, "Soc", TopBindings::new());
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ElabError::RegionOverlap { space, base: 0x1020, size: 8 } if space == "Soc.bus"
    ));
}

#[test]
fn re_elaboration_is_identical() {
    let ir = soc_design(0x2000);
    let a = build(&ir, "Soc");
    let b = build(&ir, "Soc");
    assert_eq!(a.tree.fingerprint(), b.tree.fingerprint());
    assert_eq!(a.tree.bind_order(), b.tree.bind_order());
    assert_eq!(a.tree.region_map(), b.tree.region_map());

    let other = build(&soc_design(0x3000), "Soc");
    assert_ne!(a.tree.fingerprint(), other.tree.fingerprint());
}

#[test]
fn json_design_elaborates_identically() {
    let ir = soc_design(0x2000);
    let json = ir.to_json().unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["types"].as_array().map(Vec::len), Some(1));
    assert_eq!(doc["types"][0]["name"], "Soc");

    let reloaded = Context::from_json(&json).unwrap();
    let a = build(&ir, "Soc");
    let b = build(&reloaded, "Soc");
    assert_eq!(a.tree.fingerprint(), b.tree.fingerprint());
    assert_eq!(a.tree.bind_order(), b.tree.bind_order());
    assert_eq!(a.tree.region_map(), b.tree.region_map());
}

// ---- comb cycles ----

#[test]
fn comb_cycle_hits_the_depth_limit() {
    let mut ir = Context::new();
    let mut top = ComponentBuilder::new("Top");
    let x = top.signal("x", 8);
    let y = top.signal("y", 8);
    top.comb(
        "fwd",
        vec![Stmt::assign(Expr::field(y), Expr::bin(Expr::field(x), BinOp::Add, Expr::int(1)))],
    );
    top.comb(
        "back",
        vec![Stmt::assign(Expr::field(x), Expr::bin(Expr::field(y), BinOp::Add, Expr::int(1)))],
    );
    ir.add_type(top.build()).unwrap();

    let options = SimOptions {
        max_comb_depth: 8,
        ..SimOptions::default()
    };
    let sim = build(&ir, "Top").into_simulation(options).unwrap();
    assert!(matches!(
        sim.start(),
        Err(SimError::CombCycleDetected { .. })
    ));
}
