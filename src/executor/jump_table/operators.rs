//! Operator family (§4.4 Opcode family table, "Operators"; §3 Type
//! operator table). Primitive operands are evaluated directly with checked
//! arithmetic; `Value::Instance` operands dispatch to the receiver's own
//! overload of the corresponding [`Operator`] (§3).

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{
    dispatch_operator_method, hash_indexer_set, pack_hash_pairs, pack_value_list, read_hash_pairs, read_string,
    read_value_list, value_compare, value_equals, value_to_display_string, Interpreter, StepOutcome,
};
use crate::instruction::Instruction;
use crate::opcode::OpCode;
use crate::types::Operator;
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::Add, add);
    table.register(OpCode::Sub, sub);
    table.register(OpCode::Or, or);
    table.register(OpCode::Xor, xor);
    table.register(OpCode::Mul, mul);
    table.register(OpCode::Div, div);
    table.register(OpCode::Mod, rem);
    table.register(OpCode::And, and);
    table.register(OpCode::Pow, pow);
    table.register(OpCode::Shl, shl);
    table.register(OpCode::Shr, shr);
    table.register(OpCode::Plus, plus);
    table.register(OpCode::Neg, neg);
    table.register(OpCode::Not, not);
    table.register(OpCode::Eq, eq);
    table.register(OpCode::Cmp, cmp);
    table.register(OpCode::Concat, concat);
}

fn pop(vm: &mut Interpreter) -> VmResult<Value> {
    vm.call_stack.current_mut().expect("no active frame").pop()
}

fn push(vm: &mut Interpreter, value: Value) {
    vm.call_stack.current_mut().expect("no active frame").push(value);
}

/// Pops the two operands of a binary operator in call order (left pushed
/// first, so it is popped second).
fn pop_binary(vm: &mut Interpreter) -> VmResult<(Value, Value)> {
    let rhs = vm.read_operand(pop(vm)?)?;
    let lhs = vm.read_operand(pop(vm)?)?;
    Ok((lhs, rhs))
}

fn binary(
    vm: &mut Interpreter,
    operator: Operator,
    int_op: fn(i64, i64) -> VmResult<i64>,
    uint_op: fn(u64, u64) -> VmResult<u64>,
    real_op: fn(f64, f64) -> VmResult<f64>,
) -> VmResult<StepOutcome> {
    let (lhs, rhs) = pop_binary(vm)?;
    let result = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(a, b)?),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(uint_op(a, b)?),
        (Value::Real(a), Value::Real(b)) => Value::Real(real_op(a, b)?),
        (Value::Instance { type_handle, .. }, _) => dispatch_operator_method(vm, type_handle, operator, vec![lhs, rhs])?,
        _ => return Err(VmError::invalid_type("matching numeric operands", "mismatched operand types")),
    };
    push(vm, result);
    Ok(StepOutcome::Continue)
}

fn checked_add_i(a: i64, b: i64) -> VmResult<i64> {
    a.checked_add(b).ok_or_else(|| VmError::overflow("add"))
}
fn checked_sub_i(a: i64, b: i64) -> VmResult<i64> {
    a.checked_sub(b).ok_or_else(|| VmError::overflow("subtract"))
}
fn checked_mul_i(a: i64, b: i64) -> VmResult<i64> {
    a.checked_mul(b).ok_or_else(|| VmError::overflow("multiply"))
}
fn checked_div_i(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(VmError::division_by_zero("divide"));
    }
    a.checked_div(b).ok_or_else(|| VmError::overflow("divide"))
}
fn checked_rem_i(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(VmError::division_by_zero("modulo"));
    }
    a.checked_rem(b).ok_or_else(|| VmError::overflow("modulo"))
}
fn pow_i(a: i64, b: i64) -> VmResult<i64> {
    let exp = u32::try_from(b).map_err(|_| VmError::invalid_operation_msg("negative exponent"))?;
    a.checked_pow(exp).ok_or_else(|| VmError::overflow("power"))
}
fn shl_i(a: i64, b: i64) -> VmResult<i64> {
    Ok(a.wrapping_shl(b as u32))
}
fn shr_i(a: i64, b: i64) -> VmResult<i64> {
    Ok(a.wrapping_shr(b as u32))
}
fn bitor_i(a: i64, b: i64) -> VmResult<i64> {
    Ok(a | b)
}
fn bitxor_i(a: i64, b: i64) -> VmResult<i64> {
    Ok(a ^ b)
}
fn bitand_i(a: i64, b: i64) -> VmResult<i64> {
    Ok(a & b)
}

fn checked_add_u(a: u64, b: u64) -> VmResult<u64> {
    a.checked_add(b).ok_or_else(|| VmError::overflow("add"))
}
fn checked_sub_u(a: u64, b: u64) -> VmResult<u64> {
    a.checked_sub(b).ok_or_else(|| VmError::overflow("subtract"))
}
fn checked_mul_u(a: u64, b: u64) -> VmResult<u64> {
    a.checked_mul(b).ok_or_else(|| VmError::overflow("multiply"))
}
fn checked_div_u(a: u64, b: u64) -> VmResult<u64> {
    if b == 0 {
        return Err(VmError::division_by_zero("divide"));
    }
    Ok(a / b)
}
fn checked_rem_u(a: u64, b: u64) -> VmResult<u64> {
    if b == 0 {
        return Err(VmError::division_by_zero("modulo"));
    }
    Ok(a % b)
}
fn pow_u(a: u64, b: u64) -> VmResult<u64> {
    let exp = u32::try_from(b).map_err(|_| VmError::overflow("power"))?;
    a.checked_pow(exp).ok_or_else(|| VmError::overflow("power"))
}
fn shl_u(a: u64, b: u64) -> VmResult<u64> {
    Ok(a.wrapping_shl(b as u32))
}
fn shr_u(a: u64, b: u64) -> VmResult<u64> {
    Ok(a.wrapping_shr(b as u32))
}
fn bitor_u(a: u64, b: u64) -> VmResult<u64> {
    Ok(a | b)
}
fn bitxor_u(a: u64, b: u64) -> VmResult<u64> {
    Ok(a ^ b)
}
fn bitand_u(a: u64, b: u64) -> VmResult<u64> {
    Ok(a & b)
}

fn add_r(a: f64, b: f64) -> VmResult<f64> {
    Ok(a + b)
}
fn sub_r(a: f64, b: f64) -> VmResult<f64> {
    Ok(a - b)
}
fn mul_r(a: f64, b: f64) -> VmResult<f64> {
    Ok(a * b)
}
fn div_r(a: f64, b: f64) -> VmResult<f64> {
    if b == 0.0 {
        return Err(VmError::division_by_zero("divide"));
    }
    Ok(a / b)
}
fn rem_r(a: f64, b: f64) -> VmResult<f64> {
    if b == 0.0 {
        return Err(VmError::division_by_zero("modulo"));
    }
    Ok(a % b)
}
fn pow_r(a: f64, b: f64) -> VmResult<f64> {
    Ok(a.powf(b))
}
fn unsupported_r(_a: f64, _b: f64) -> VmResult<f64> {
    Err(VmError::invalid_operation_msg("bitwise operator on real operands"))
}

fn add(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Add, checked_add_i, checked_add_u, add_r)
}
fn sub(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Subtract, checked_sub_i, checked_sub_u, sub_r)
}
fn mul(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Multiply, checked_mul_i, checked_mul_u, mul_r)
}
fn div(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Divide, checked_div_i, checked_div_u, div_r)
}
fn rem(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Modulo, checked_rem_i, checked_rem_u, rem_r)
}
fn pow(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Power, pow_i, pow_u, pow_r)
}
fn or(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Or, bitor_i, bitor_u, unsupported_r)
}
fn xor(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::Xor, bitxor_i, bitxor_u, unsupported_r)
}
fn and(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::And, bitand_i, bitand_u, unsupported_r)
}
fn shl(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::ShiftLeft, shl_i, shl_u, unsupported_r)
}
fn shr(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    binary(vm, Operator::ShiftRight, shr_i, shr_u, unsupported_r)
}

fn unary(
    vm: &mut Interpreter,
    operator: Operator,
    int_op: fn(i64) -> VmResult<i64>,
    uint_op: fn(u64) -> VmResult<u64>,
    real_op: fn(f64) -> VmResult<f64>,
) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    let result = match value {
        Value::Int(a) => Value::Int(int_op(a)?),
        Value::UInt(a) => Value::UInt(uint_op(a)?),
        Value::Real(a) => Value::Real(real_op(a)?),
        Value::Instance { type_handle, .. } => dispatch_operator_method(vm, type_handle, operator, vec![value])?,
        _ => return Err(VmError::invalid_type("numeric operand", "non-numeric value")),
    };
    push(vm, result);
    Ok(StepOutcome::Continue)
}

fn plus(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    unary(vm, Operator::Plus, |a| Ok(a), |a| Ok(a), |a| Ok(a))
}

fn neg(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    unary(
        vm,
        Operator::Negate,
        |a| a.checked_neg().ok_or_else(|| VmError::overflow("negate")),
        |_a| Err(VmError::invalid_operation_msg("cannot negate an unsigned value")),
        |a| Ok(-a),
    )
}

fn not(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    let result = match value {
        Value::Bool(b) => Value::Bool(!b),
        Value::Int(a) => Value::Int(!a),
        Value::UInt(a) => Value::UInt(!a),
        Value::Instance { type_handle, .. } => dispatch_operator_method(vm, type_handle, Operator::Not, vec![value])?,
        _ => return Err(VmError::invalid_type("bool or integer", "non-boolean value")),
    };
    push(vm, result);
    Ok(StepOutcome::Continue)
}

fn eq(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let (lhs, rhs) = pop_binary(vm)?;
    let result = value_equals(vm, lhs, rhs)?;
    push(vm, Value::Bool(result));
    Ok(StepOutcome::Continue)
}

fn cmp(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let (lhs, rhs) = pop_binary(vm)?;
    let result = value_compare(vm, lhs, rhs)?;
    push(vm, Value::Int(result));
    Ok(StepOutcome::Continue)
}

/// `concat` has three special cases, in order (§4.4 Concatenation
/// operator): two Lists concatenate into a new List; two Hashes
/// concatenate via repeated indexer-set; otherwise both sides coerce to
/// String and concatenate, with a receiver's own `Concat` overload
/// preferred over the built-in String coercion when the receiver is an
/// instance of neither List, Hash, nor String.
fn concat(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let (lhs, rhs) = pop_binary(vm)?;
    let list_type = vm.list_type;
    let hash_type = vm.hash_type;
    let string_type = vm.string_type;

    let result = match (lhs, rhs) {
        (Value::Instance { type_handle: lt, object: lo }, Value::Instance { type_handle: rt, object: ro })
            if lt == list_type && rt == list_type =>
        {
            let mut items = read_value_list(vm.gc, lo)?;
            items.extend(read_value_list(vm.gc, ro)?);
            pack_value_list(vm.gc, list_type, items)?
        }
        (Value::Instance { type_handle: lt, object: lo }, Value::Instance { type_handle: rt, object: ro })
            if lt == hash_type && rt == hash_type =>
        {
            let mut pairs = read_hash_pairs(vm.gc, lo)?;
            for (key, value) in read_hash_pairs(vm.gc, ro)? {
                hash_indexer_set(vm, &mut pairs, key, value)?;
            }
            pack_hash_pairs(vm.gc, hash_type, pairs)?
        }
        (Value::Instance { type_handle: lt, object: lo }, Value::Instance { type_handle: rt, object: ro })
            if lt == string_type && rt == string_type =>
        {
            let mut text = read_string(vm.gc, lo)?;
            text.push_str(&read_string(vm.gc, ro)?);
            let handle = vm.gc.intern(string_type, &text)?;
            Value::Instance {
                type_handle: string_type,
                object: handle,
            }
        }
        (Value::Instance { type_handle: lt, .. }, _) => dispatch_operator_method(vm, lt, Operator::Concat, vec![lhs, rhs])?,
        (lhs, rhs) => {
            let mut text = value_to_display_string(lhs)?;
            text.push_str(&value_to_display_string(rhs)?);
            let handle = vm.gc.intern(string_type, &text)?;
            Value::Instance {
                type_handle: string_type,
                object: handle,
            }
        }
    };
    push(vm, result);
    Ok(StepOutcome::Continue)
}
