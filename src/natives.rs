//! The built-in natives registered into `lib`.

use cellar_runtime::{Bounce, Frame, Heap, Kind, ParamSpec, Result, RuntimeError, TypeSet, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Integer(i64),
    Decimal(f64),
}

impl Number {
    fn of(value: &Value) -> Result<Number> {
        match value.datatype() {
            Kind::Integer => Ok(Number::Integer(value.as_integer()?)),
            Kind::Decimal => Ok(Number::Decimal(value.as_decimal()?)),
            found => Err(RuntimeError::expected("integer or decimal", found)),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Integer(n) => Value::integer(n),
            Number::Decimal(n) => Value::decimal(n),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Decimal(n) => n,
        }
    }
}

fn numbers() -> TypeSet {
    TypeSet::of(&[Kind::Integer, Kind::Decimal])
}

fn series() -> TypeSet {
    TypeSet::of(&[Kind::Text, Kind::Issue, Kind::Binary, Kind::Block, Kind::Group])
}

/// Applies a binary operation to the first two arguments. Integers stay integers unless either
/// side is a decimal.
fn arithmetic(
    frame: &mut Frame<'_>,
    integers: fn(i64, i64) -> Option<i64>,
    decimals: fn(f64, f64) -> f64,
) -> Result<Bounce> {
    let a = Number::of(&frame.arg(0))?;
    let b = Number::of(&frame.arg(1))?;

    let out = match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => integers(a, b)
            .map(Number::Integer)
            .ok_or_else(|| RuntimeError::Overflow(frame.label().to_string()))?,
        (a, b) => Number::Decimal(decimals(a.to_f64(), b.to_f64())),
    };

    Ok(Bounce::Out(out.into_value()))
}

/// add : number -> number -> number
pub fn add(frame: &mut Frame<'_>) -> Result<Bounce> {
    arithmetic(frame, i64::checked_add, |a, b| a + b)
}

/// subtract : number -> number -> number
pub fn subtract(frame: &mut Frame<'_>) -> Result<Bounce> {
    arithmetic(frame, i64::checked_sub, |a, b| a - b)
}

/// multiply : number -> number -> number
pub fn multiply(frame: &mut Frame<'_>) -> Result<Bounce> {
    arithmetic(frame, i64::checked_mul, |a, b| a * b)
}

/// negate : number -> number
pub fn negate(frame: &mut Frame<'_>) -> Result<Bounce> {
    let out = match Number::of(&frame.arg(0))? {
        Number::Integer(n) => n
            .checked_neg()
            .map(Number::Integer)
            .ok_or_else(|| RuntimeError::Overflow(frame.label().to_string()))?,
        Number::Decimal(n) => Number::Decimal(-n),
    };

    Ok(Bounce::Out(out.into_value()))
}

/// add1 : integer -> integer
pub fn add1(frame: &mut Frame<'_>) -> Result<Bounce> {
    let n = frame.arg(0).as_integer()?;

    n.checked_add(1)
        .map(|n| Bounce::Out(Value::integer(n)))
        .ok_or_else(|| RuntimeError::Overflow(frame.label().to_string()))
}

/// length-of : series -> integer
pub fn length_of(frame: &mut Frame<'_>) -> Result<Bounce> {
    let series = frame.arg(0);
    let len = frame.heap().length_of(&series)?;
    Ok(Bounce::Out(Value::integer(len as i64)))
}

/// append : series -> value -> series
pub fn append(frame: &mut Frame<'_>) -> Result<Bounce> {
    let series = frame.arg(0);
    let item = frame.arg(1);

    frame.heap().append(&series, &item)?;
    Ok(Bounce::Out(series))
}

/// freeze : value -> value
pub fn freeze(frame: &mut Frame<'_>) -> Result<Bounce> {
    let value = frame.arg(0);
    frame.heap().freeze(&value)?;
    Ok(Bounce::Out(value))
}

/// frozen? : value -> logic
pub fn is_frozen(frame: &mut Frame<'_>) -> Result<Bounce> {
    let value = frame.arg(0);
    let frozen = frame.heap().is_frozen(&value);
    Ok(Bounce::Out(Value::logic(frozen)))
}

/// quote : value -> quoted
pub fn quote(frame: &mut Frame<'_>) -> Result<Bounce> {
    let mut value = frame.arg(0);
    frame.heap().quote(&mut value)?;
    Ok(Bounce::Out(value))
}

/// unquote : quoted -> value
pub fn unquote(frame: &mut Frame<'_>) -> Result<Bounce> {
    let mut value = frame.arg(0);
    frame.heap().unquote(&mut value)?;
    Ok(Bounce::Out(value))
}

/// type-of : value -> datatype
pub fn type_of(frame: &mut Frame<'_>) -> Result<Bounce> {
    Ok(Bounce::Out(Value::datatype_of(frame.arg(0).datatype())))
}

/// recycle : integer
///
/// Runs a collection and returns how many nodes it freed.
pub fn recycle(frame: &mut Frame<'_>) -> Result<Bounce> {
    let freed = frame.heap().recycle();
    Ok(Bounce::Out(Value::integer(freed as i64)))
}

/// Registers every native into `lib`.
pub fn register(heap: &mut Heap) -> Result<()> {
    let any = || ParamSpec::normal("value", TypeSet::ANY);
    let binary = || {
        [
            ParamSpec::normal("value1", numbers()),
            ParamSpec::normal("value2", numbers()),
        ]
    };

    heap.register_native("add", &binary(), add)?;
    heap.register_native("subtract", &binary(), subtract)?;
    heap.register_native("multiply", &binary(), multiply)?;
    heap.register_native("negate", &[ParamSpec::normal("number", numbers())], negate)?;
    heap.register_native(
        "add1",
        &[ParamSpec::normal("n", TypeSet::of(&[Kind::Integer]))],
        add1,
    )?;
    heap.register_native("length-of", &[ParamSpec::normal("series", series())], length_of)?;
    heap.register_native(
        "append",
        &[ParamSpec::normal("series", series()), ParamSpec::normal("value", TypeSet::ANY)],
        append,
    )?;
    heap.register_native("freeze", &[any()], freeze)?;
    heap.register_native("frozen?", &[any()], is_frozen)?;
    heap.register_native("quote", &[any()], quote)?;
    heap.register_native("unquote", &[any()], unquote)?;
    heap.register_native("type-of", &[any()], type_of)?;
    heap.register_native("recycle", &[], recycle)?;

    tracing::debug!("registered natives");
    Ok(())
}
