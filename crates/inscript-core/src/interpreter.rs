//! Function body interpreter
//!
//! Evaluates statements and expressions against a frame's working state.
//! Arithmetic is checked i64; uint-typed storage can never go negative;
//! cross-contract calls push new frames through the execution engine while
//! same-contract calls recurse in place.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contract::ContractType;
use crate::engine::{FrameKind, FrameParams, TxExecution};
use crate::parser::ast::{
    AssignOp, BinaryOp, Expr, FunctionDecl, LValue, Stmt, TypeExpr, UnaryOp,
};
use crate::state::Value;
use crate::validator::is_address;
use crate::{Error, Result};

/// Interpreter recursion limit for same-contract calls; cross-contract
/// depth is enforced by the call stack itself.
const MAX_INTERNAL_DEPTH: usize = 64;

/// The contract identity a function body runs under
pub(crate) struct FrameEnv {
    pub contract_address: String,
    pub ty: Arc<ContractType>,
    pub msg_sender: String,
}

enum Flow {
    Normal,
    Return(Option<Value>),
}

type Locals = BTreeMap<String, Value>;

/// Run one function with payload-shaped args (object, array, or null)
pub(crate) fn call_function(
    exec: &mut TxExecution,
    env: &FrameEnv,
    func: &FunctionDecl,
    args: &serde_json::Value,
    call_index: u32,
    depth: usize,
) -> Result<Option<Value>> {
    if depth >= MAX_INTERNAL_DEPTH {
        return Err(Error::Execution(format!(
            "internal call recursion limit of {} exceeded",
            MAX_INTERNAL_DEPTH
        )));
    }

    let mut locals = bind_args(func, args)?;
    match exec_block(exec, env, &func.body, &mut locals, call_index, depth)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => Ok(None),
    }
}

/// Bind call arguments to parameters: by name for objects, positionally
/// for arrays; null binds an empty parameter list.
fn bind_args(func: &FunctionDecl, args: &serde_json::Value) -> Result<Locals> {
    let mut locals = Locals::new();
    match args {
        serde_json::Value::Null => {
            if !func.params.is_empty() {
                return Err(Error::Execution(format!(
                    "function {} expects {} argument(s), got none",
                    func.name,
                    func.params.len()
                )));
            }
        }
        serde_json::Value::Object(map) => {
            for param in &func.params {
                let raw = map.get(&param.name).ok_or_else(|| {
                    Error::Execution(format!(
                        "missing argument {} for function {}",
                        param.name, func.name
                    ))
                })?;
                let value = coerce_arg(Value::from_json(raw)?, &param.ty, &param.name)?;
                locals.insert(param.name.clone(), value);
            }
            for key in map.keys() {
                if !func.params.iter().any(|p| &p.name == key) {
                    return Err(Error::Execution(format!(
                        "unknown argument {} for function {}",
                        key, func.name
                    )));
                }
            }
        }
        serde_json::Value::Array(items) => {
            if items.len() != func.params.len() {
                return Err(Error::Execution(format!(
                    "function {} expects {} argument(s), got {}",
                    func.name,
                    func.params.len(),
                    items.len()
                )));
            }
            for (param, raw) in func.params.iter().zip(items) {
                let value = coerce_arg(Value::from_json(raw)?, &param.ty, &param.name)?;
                locals.insert(param.name.clone(), value);
            }
        }
        other => {
            return Err(Error::Execution(format!(
                "arguments must be an object or array, got {}",
                other
            )))
        }
    }
    Ok(locals)
}

/// Check an argument against its declared type, normalizing addresses
fn coerce_arg(value: Value, ty: &TypeExpr, name: &str) -> Result<Value> {
    match (ty, value) {
        (TypeExpr::Uint, Value::Int(i)) if i >= 0 => Ok(Value::Int(i)),
        (TypeExpr::Uint, Value::Int(_)) => Err(Error::Execution(format!(
            "argument {} must be a non-negative integer",
            name
        ))),
        (TypeExpr::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (TypeExpr::StringTy, Value::Str(s)) => Ok(Value::Str(s)),
        (TypeExpr::Address, Value::Str(s)) if is_address(&s) => {
            Ok(Value::Str(s.to_lowercase()))
        }
        (TypeExpr::Address, Value::Str(s)) => Err(Error::Execution(format!(
            "argument {} is not a valid address: {}",
            name, s
        ))),
        (TypeExpr::Map(_, _), Value::Map(m)) => Ok(Value::Map(m)),
        (expected, actual) => Err(Error::Execution(format!(
            "argument {} expects {}, got {}",
            name,
            expected,
            actual.type_name()
        ))),
    }
}

// ── Statements ─────────────────────────────────────────────

fn exec_block(
    exec: &mut TxExecution,
    env: &FrameEnv,
    stmts: &[Stmt],
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
) -> Result<Flow> {
    for stmt in stmts {
        match exec_stmt(exec, env, stmt, locals, call_index, depth)? {
            Flow::Normal => {}
            flow @ Flow::Return(_) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt(
    exec: &mut TxExecution,
    env: &FrameEnv,
    stmt: &Stmt,
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
) -> Result<Flow> {
    match stmt {
        Stmt::Let { name, value } => {
            let value = eval(exec, env, value, locals, call_index, depth)?;
            locals.insert(name.clone(), value);
            Ok(Flow::Normal)
        }
        Stmt::Assign { target, op, value } => {
            let value = eval(exec, env, value, locals, call_index, depth)?;
            assign(exec, env, target, *op, value, locals, call_index, depth)?;
            Ok(Flow::Normal)
        }
        Stmt::Require { cond, message } => {
            match eval(exec, env, cond, locals, call_index, depth)? {
                Value::Bool(true) => Ok(Flow::Normal),
                Value::Bool(false) => Err(Error::Execution(message.clone())),
                other => Err(Error::Execution(format!(
                    "require condition must be bool, got {}",
                    other.type_name()
                ))),
            }
        }
        Stmt::Emit { event, args } => {
            let mut data = Vec::with_capacity(args.len());
            for arg in args {
                data.push(eval(exec, env, arg, locals, call_index, depth)?.to_json());
            }
            exec.emit_log(
                call_index,
                &env.contract_address,
                event,
                serde_json::Value::Array(data),
            );
            Ok(Flow::Normal)
        }
        Stmt::Return { value } => {
            let value = match value {
                Some(expr) => Some(eval(exec, env, expr, locals, call_index, depth)?),
                None => None,
            };
            Ok(Flow::Return(value))
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let branch = match eval(exec, env, cond, locals, call_index, depth)? {
                Value::Bool(true) => Some(then_branch),
                Value::Bool(false) => else_branch.as_ref(),
                other => {
                    return Err(Error::Execution(format!(
                        "if condition must be bool, got {}",
                        other.type_name()
                    )))
                }
            };
            match branch {
                Some(stmts) => exec_block(exec, env, stmts, locals, call_index, depth),
                None => Ok(Flow::Normal),
            }
        }
        Stmt::Expr(expr) => {
            eval(exec, env, expr, locals, call_index, depth)?;
            Ok(Flow::Normal)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn assign(
    exec: &mut TxExecution,
    env: &FrameEnv,
    target: &LValue,
    op: AssignOp,
    value: Value,
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
) -> Result<()> {
    match target {
        LValue::Var(name) => {
            if locals.contains_key(name) {
                let current = locals.get(name).cloned().unwrap_or(Value::Null);
                let new_value = apply_assign_op(op, current, value, name)?;
                locals.insert(name.clone(), new_value);
                return Ok(());
            }
            let layout_ty = env.ty.storage_layout.get(name).cloned().ok_or_else(|| {
                Error::Execution(format!("unknown variable {}", name))
            })?;
            let current = read_storage(exec, env, name, &layout_ty)?;
            let new_value = apply_assign_op(op, current, value, name)?;
            check_storage_write(&layout_ty, &new_value, name)?;
            exec.working_state_mut(&env.contract_address)?
                .insert(name.clone(), new_value);
            Ok(())
        }
        LValue::Index { name, key } => {
            let key = eval(exec, env, key, locals, call_index, depth)?.as_map_key()?;
            let layout_ty = env.ty.storage_layout.get(name).cloned().ok_or_else(|| {
                Error::Execution(format!("unknown storage map {}", name))
            })?;
            let value_ty = match &layout_ty {
                TypeExpr::Map(_, value_ty) => (**value_ty).clone(),
                other => {
                    return Err(Error::Execution(format!(
                        "{} is not a map, it is {}",
                        name, other
                    )))
                }
            };

            let mut map = match read_storage(exec, env, name, &layout_ty)? {
                Value::Map(map) => map,
                other => {
                    return Err(Error::Execution(format!(
                        "{} holds {} instead of a map",
                        name,
                        other.type_name()
                    )))
                }
            };
            let current = map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Value::default_for(&value_ty));
            let new_value = apply_assign_op(op, current, value, name)?;
            check_storage_write(&value_ty, &new_value, name)?;
            map.insert(key, new_value);
            exec.working_state_mut(&env.contract_address)?
                .insert(name.clone(), Value::Map(map));
            Ok(())
        }
    }
}

fn apply_assign_op(op: AssignOp, current: Value, value: Value, name: &str) -> Result<Value> {
    match op {
        AssignOp::Assign => Ok(value),
        AssignOp::AddAssign | AssignOp::SubAssign => {
            let (current, delta) = match (current, value) {
                (Value::Int(a), Value::Int(b)) => (a, b),
                (a, b) => {
                    return Err(Error::Execution(format!(
                        "compound assignment to {} requires integers, got {} and {}",
                        name,
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            let result = if op == AssignOp::AddAssign {
                current.checked_add(delta)
            } else {
                current.checked_sub(delta)
            };
            result
                .map(Value::Int)
                .ok_or_else(|| Error::Execution(format!("integer overflow updating {}", name)))
        }
    }
}

/// uint-typed storage may never hold a negative value
fn check_storage_write(ty: &TypeExpr, value: &Value, name: &str) -> Result<()> {
    if let (TypeExpr::Uint, Value::Int(i)) = (ty, value) {
        if *i < 0 {
            return Err(Error::Execution(format!("uint underflow on {}", name)));
        }
    }
    Ok(())
}

fn read_storage(exec: &TxExecution, env: &FrameEnv, name: &str, ty: &TypeExpr) -> Result<Value> {
    Ok(exec
        .working_state(&env.contract_address)?
        .get(name)
        .cloned()
        .unwrap_or_else(|| Value::default_for(ty)))
}

// ── Expressions ────────────────────────────────────────────

fn eval(
    exec: &mut TxExecution,
    env: &FrameEnv,
    expr: &Expr,
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
) -> Result<Value> {
    match expr {
        Expr::Integer(i) => Ok(Value::Int(*i)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::AddressLit(addr) => Ok(Value::Str(addr.clone())),
        Expr::MsgSender => Ok(Value::Str(env.msg_sender.clone())),
        Expr::BlockNumber => Ok(Value::Int(exec.ctx.block_number as i64)),
        Expr::BlockTimestamp => Ok(Value::Int(exec.ctx.block_timestamp as i64)),
        Expr::BlockChainId => Ok(Value::Int(exec.ctx.chain_id as i64)),
        Expr::Ident(name) => {
            if let Some(value) = locals.get(name) {
                return Ok(value.clone());
            }
            let ty = env.ty.storage_layout.get(name).ok_or_else(|| {
                Error::Execution(format!("unknown identifier {}", name))
            })?;
            read_storage(exec, env, name, ty)
        }
        Expr::Index { name, key } => {
            let key = eval(exec, env, key, locals, call_index, depth)?.as_map_key()?;
            if let Some(Value::Map(map)) = locals.get(name) {
                return Ok(map.get(&key).cloned().unwrap_or(Value::Null));
            }
            let layout_ty = env.ty.storage_layout.get(name).cloned().ok_or_else(|| {
                Error::Execution(format!("unknown storage map {}", name))
            })?;
            let value_ty = match &layout_ty {
                TypeExpr::Map(_, value_ty) => (**value_ty).clone(),
                other => {
                    return Err(Error::Execution(format!(
                        "{} is not a map, it is {}",
                        name, other
                    )))
                }
            };
            match read_storage(exec, env, name, &layout_ty)? {
                Value::Map(map) => Ok(map
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(&value_ty))),
                other => Err(Error::Execution(format!(
                    "{} holds {} instead of a map",
                    name,
                    other.type_name()
                ))),
            }
        }
        Expr::InternalCall { function, args } => {
            if function == "constructor" {
                return Err(Error::Execution(
                    "constructor cannot be called directly".into(),
                ));
            }
            let func = env.ty.function(function).ok_or_else(|| {
                Error::Execution(format!(
                    "function {} does not exist on contract {}",
                    function, env.ty.name
                ))
            })?;
            let func = Arc::clone(func);
            let mut json_args = Vec::with_capacity(args.len());
            for arg in args {
                json_args.push(eval(exec, env, arg, locals, call_index, depth)?.to_json());
            }
            let result = call_function(
                exec,
                env,
                &func,
                &serde_json::Value::Array(json_args),
                call_index,
                depth + 1,
            )?;
            Ok(result.unwrap_or(Value::Null))
        }
        Expr::ExternalCall { to, function, args } => {
            let params = cross_contract_params(exec, env, to, function, args, locals, call_index, depth, false)?;
            let result = exec.execute_frame(params)?;
            Ok(result.unwrap_or(Value::Null))
        }
        Expr::TryCall { to, function, args } => {
            let params = cross_contract_params(exec, env, to, function, args, locals, call_index, depth, true)?;
            match exec.execute_frame(params) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(Error::Execution(_)) | Err(Error::Dependency(_)) | Err(Error::Parse { .. }) => {
                    Ok(Value::Bool(false))
                }
                Err(other) => Err(other),
            }
        }
        Expr::Upgrade { new_hash } => {
            let hash = match eval(exec, env, new_hash, locals, call_index, depth)? {
                Value::Str(hash) => hash,
                other => {
                    return Err(Error::Execution(format!(
                        "upgrade expects an init code hash string, got {}",
                        other.type_name()
                    )))
                }
            };
            exec.upgrade_contract(&env.contract_address, &hash)?;
            Ok(Value::Null)
        }
        Expr::Unary { op, expr } => {
            let value = eval(exec, env, expr, locals, call_index, depth)?;
            match (op, value) {
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| Error::Execution("integer overflow in negation".into())),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (op, value) => Err(Error::Execution(format!(
                    "unary {:?} cannot apply to {}",
                    op,
                    value.type_name()
                ))),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(exec, env, *op, lhs, rhs, locals, call_index, depth),
    }
}

#[allow(clippy::too_many_arguments)]
fn eval_binary(
    exec: &mut TxExecution,
    env: &FrameEnv,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
) -> Result<Value> {
    // Short-circuit forms first
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let lhs = expect_bool(eval(exec, env, lhs, locals, call_index, depth)?, op)?;
        if op == BinaryOp::And && !lhs {
            return Ok(Value::Bool(false));
        }
        if op == BinaryOp::Or && lhs {
            return Ok(Value::Bool(true));
        }
        let rhs = expect_bool(eval(exec, env, rhs, locals, call_index, depth)?, op)?;
        return Ok(Value::Bool(rhs));
    }

    let lhs = eval(exec, env, lhs, locals, call_index, depth)?;
    let rhs = eval(exec, env, rhs, locals, call_index, depth)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (a, b) = expect_ints(lhs, rhs, op)?;
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(Error::Execution("division by zero".into()));
                    }
                    a.checked_div(b)
                }
                _ => unreachable!(),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| Error::Execution(format!("integer overflow in {:?}", op)))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = expect_ints(lhs, rhs, op)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Ge => a >= b,
                _ => unreachable!(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn expect_bool(value: Value, op: BinaryOp) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(Error::Execution(format!(
            "{:?} requires bool operands, got {}",
            op,
            other.type_name()
        ))),
    }
}

fn expect_ints(lhs: Value, rhs: Value, op: BinaryOp) -> Result<(i64, i64)> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok((a, b)),
        (a, b) => Err(Error::Execution(format!(
            "{:?} requires integer operands, got {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn cross_contract_params(
    exec: &mut TxExecution,
    env: &FrameEnv,
    to: &Expr,
    function: &str,
    args: &[Expr],
    locals: &mut Locals,
    call_index: u32,
    depth: usize,
    in_low_level: bool,
) -> Result<FrameParams> {
    let target = match eval(exec, env, to, locals, call_index, depth)? {
        Value::Str(addr) if is_address(&addr) => addr.to_lowercase(),
        other => {
            return Err(Error::Execution(format!(
                "call target must be an address, got {}",
                other.type_name()
            )))
        }
    };
    let mut json_args = Vec::with_capacity(args.len());
    for arg in args {
        json_args.push(eval(exec, env, arg, locals, call_index, depth)?.to_json());
    }
    Ok(FrameParams {
        kind: FrameKind::Call { to: target },
        caller: env.contract_address.clone(),
        function: Some(function.to_string()),
        args: if json_args.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::Array(json_args)
        },
        in_low_level,
    })
}
