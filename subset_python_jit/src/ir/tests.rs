use super::*;
use crate::types::PyType;

fn sample_function() -> IrFunction {
    // fn clamp_low(x: int64) -> int64:
    //   return 0 if x < 0 else x
    let mut func = IrFunction::new(
        "clamp_low",
        vec![("x".to_string(), PyType::INT64)],
        PyType::INT64,
    );
    let x = VarRef::new("x", PyType::INT64);
    let zero = VarRef::new(".t0", PyType::INT64);
    let cond = VarRef::new(".t1", PyType::Bool);
    let entry = func.entry_block_mut().unwrap();
    entry.push(Instruction::LoadConst {
        dest: zero.clone(),
        value: ConstValue::Int64(0),
    });
    entry.push(Instruction::BinOp {
        dest: cond.clone(),
        op: BinOpKind::Lt,
        left: x.clone(),
        right: zero.clone(),
    });
    entry.set_terminator(Terminator::Branch {
        cond,
        then_block: "then0".to_string(),
        else_block: "join0".to_string(),
    });

    let mut then0 = BasicBlock::new("then0");
    then0.set_terminator(Terminator::Jump("join0".to_string()));
    func.add_block(then0);

    let result = VarRef::versioned("x", 1, PyType::INT64);
    let mut join0 = BasicBlock::new("join0");
    join0.push(Instruction::Phi {
        dest: result.clone(),
        incoming: vec![
            ("then0".to_string(), zero),
            ("entry".to_string(), x),
        ],
    });
    join0.set_terminator(Terminator::Return(Some(result)));
    func.add_block(join0);
    func
}

#[test]
fn test_new_function_starts_with_entry_block() {
    let func = IrFunction::new("f", vec![], PyType::None);
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(func.blocks[0].label, "entry");
    assert!(!func.blocks[0].is_terminated());
}

#[test]
fn test_block_lookup_by_label() {
    let func = sample_function();
    assert!(func.block("entry").is_some());
    assert!(func.block("join0").is_some());
    assert!(func.block("nope").is_none());
    assert_eq!(func.blocks[0].label, "entry");
}

#[test]
fn test_var_ref_display_hides_version_zero() {
    assert_eq!(VarRef::new("x", PyType::INT64).to_string(), "%x");
    assert_eq!(
        VarRef::versioned("x", 2, PyType::INT64).to_string(),
        "%x.2"
    );
    assert_eq!(VarRef::new(".t3", PyType::Bool).to_string(), "%.t3");
}

#[test]
fn test_const_value_types() {
    assert_eq!(ConstValue::Int32(7).ty(), PyType::INT32);
    assert_eq!(ConstValue::Int64(7).ty(), PyType::INT64);
    assert_eq!(ConstValue::Bool(true).ty(), PyType::Bool);
    assert_eq!(ConstValue::None.ty(), PyType::None);
}

#[test]
fn test_function_display_renders_blocks_in_order() {
    let text = sample_function().to_string();
    assert!(text.starts_with("fn clamp_low(x: int64) -> int64 {"));
    let entry_at = text.find("entry:").unwrap();
    let then_at = text.find("then0:").unwrap();
    let join_at = text.find("join0:").unwrap();
    assert!(entry_at < then_at && then_at < join_at);
    assert!(text.contains("%.t1 = lt %x, %.t0"));
    assert!(text.contains("br %.t1, then0, join0"));
    assert!(text.contains("%x.1 = phi [then0: %.t0], [entry: %x]"));
    assert!(text.contains("return %x.1"));
}

#[test]
fn test_unterminated_block_is_visible_in_dump() {
    let func = IrFunction::new("f", vec![], PyType::None);
    assert!(func.to_string().contains("<unterminated>"));
}
