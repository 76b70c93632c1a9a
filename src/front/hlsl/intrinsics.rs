//! Classification of builtin intrinsic calls.
//!
//! Intrinsic names are not reserved words: the parser asks this table when
//! it sees a plain identifier being called, and falls back to a user
//! function call when the name is unknown.

/// Built-in shader function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    // trigonometry and transcendentals, all `T -> T`
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Rsqrt,
    Exp,
    Exp2,
    Log,
    Log2,
    Abs,
    Floor,
    Ceil,
    Trunc,
    Frac,
    Degrees,
    Radians,
    // binary
    Atan2,
    Pow,
    Step,
    Min,
    Max,
    Reflect,
    // ternary
    Lerp,
    Clamp,
    SmoothStep,
    Refract,
    // vector
    Dot,
    Cross,
    Length,
    Normalize,
    Distance,
    // matrix
    Mul,
    Transpose,
    Determinant,
    // derivatives, fragment only
    Ddx,
    Ddy,
    // bit-pattern reinterpretation
    AsFloat,
    AsInt,
    AsUint,
    // atomics
    InterlockedAdd,
    InterlockedAnd,
    InterlockedOr,
    InterlockedXor,
    InterlockedMin,
    InterlockedMax,
    InterlockedExchange,
    InterlockedCompareExchange,
    InterlockedCompareStore,
}

impl Intrinsic {
    /// The number of arguments this intrinsic accepts.
    pub fn arity(self) -> std::ops::RangeInclusive<usize> {
        use Intrinsic::*;
        match self {
            Sin | Cos | Tan | Asin | Acos | Atan | Sinh | Cosh | Tanh | Sqrt | Rsqrt | Exp
            | Exp2 | Log | Log2 | Abs | Floor | Ceil | Trunc | Frac | Degrees | Radians
            | Length | Normalize | Transpose | Determinant | Ddx | Ddy | AsFloat | AsInt
            | AsUint => 1..=1,
            Atan2 | Pow | Step | Min | Max | Reflect | Dot | Cross | Distance | Mul
            | InterlockedAdd | InterlockedAnd | InterlockedOr | InterlockedXor
            | InterlockedMin | InterlockedMax => 2..=2,
            Lerp | Clamp | SmoothStep | Refract | InterlockedExchange
            | InterlockedCompareStore => 3..=3,
            InterlockedCompareExchange => 4..=4,
        }
    }

    pub fn is_atomic(self) -> bool {
        use Intrinsic::*;
        matches!(
            self,
            InterlockedAdd
                | InterlockedAnd
                | InterlockedOr
                | InterlockedXor
                | InterlockedMin
                | InterlockedMax
                | InterlockedExchange
                | InterlockedCompareExchange
                | InterlockedCompareStore
        )
    }

    pub fn is_derivative(self) -> bool {
        matches!(self, Intrinsic::Ddx | Intrinsic::Ddy)
    }
}

/// Which memory classes a barrier intrinsic orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierScope {
    Group,
    Device,
    All,
}

/// Look up an intrinsic function by its source name.
pub fn lookup(name: &str) -> Option<Intrinsic> {
    use Intrinsic::*;
    Some(match name {
        "sin" => Sin,
        "cos" => Cos,
        "tan" => Tan,
        "asin" => Asin,
        "acos" => Acos,
        "atan" => Atan,
        "sinh" => Sinh,
        "cosh" => Cosh,
        "tanh" => Tanh,
        "sqrt" => Sqrt,
        "rsqrt" => Rsqrt,
        "exp" => Exp,
        "exp2" => Exp2,
        "log" => Log,
        "log2" => Log2,
        "abs" => Abs,
        "floor" => Floor,
        "ceil" => Ceil,
        "trunc" => Trunc,
        "frac" => Frac,
        "degrees" => Degrees,
        "radians" => Radians,
        "atan2" => Atan2,
        "pow" => Pow,
        "step" => Step,
        "min" => Min,
        "max" => Max,
        "reflect" => Reflect,
        "lerp" => Lerp,
        "clamp" => Clamp,
        "smoothstep" => SmoothStep,
        "refract" => Refract,
        "dot" => Dot,
        "cross" => Cross,
        "length" => Length,
        "normalize" => Normalize,
        "distance" => Distance,
        "mul" => Mul,
        "transpose" => Transpose,
        "determinant" => Determinant,
        "ddx" => Ddx,
        "ddy" => Ddy,
        "asfloat" => AsFloat,
        "asint" => AsInt,
        "asuint" => AsUint,
        "InterlockedAdd" => InterlockedAdd,
        "InterlockedAnd" => InterlockedAnd,
        "InterlockedOr" => InterlockedOr,
        "InterlockedXor" => InterlockedXor,
        "InterlockedMin" => InterlockedMin,
        "InterlockedMax" => InterlockedMax,
        "InterlockedExchange" => InterlockedExchange,
        "InterlockedCompareExchange" => InterlockedCompareExchange,
        "InterlockedCompareStore" => InterlockedCompareStore,
        _ => return None,
    })
}

/// Look up a barrier intrinsic; the flag is `true` for the
/// `WithGroupSync` forms.
pub fn lookup_barrier(name: &str) -> Option<(BarrierScope, bool)> {
    Some(match name {
        "GroupMemoryBarrier" => (BarrierScope::Group, false),
        "GroupMemoryBarrierWithGroupSync" => (BarrierScope::Group, true),
        "DeviceMemoryBarrier" => (BarrierScope::Device, false),
        "DeviceMemoryBarrierWithGroupSync" => (BarrierScope::Device, true),
        "AllMemoryBarrier" => (BarrierScope::All, false),
        "AllMemoryBarrierWithGroupSync" => (BarrierScope::All, true),
        _ => return None,
    })
}
