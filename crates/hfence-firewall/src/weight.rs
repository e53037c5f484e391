//! Weight assignment: declaration order -> 8-bit engine priority.
//!
//! Implicit directives take the next free slot, so later declarations
//! outrank earlier ones. Explicit weights are used as given, and the implicit
//! cursor moves past them, so an implicit directive declared after an
//! explicit one never sorts below it. DNS takes two slots (deny, then allow).

use hfence_core::directive::{Directive, DirectiveKind, WeightHint};
use hfence_core::error::{HFenceError, Result};

/// Final weights for one directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assigned {
    /// Weight of the directive's filters (the allow filters for DNS).
    pub weight: u8,
    /// Weight of the DNS deny filters; always below `weight`.
    pub deny_weight: Option<u8>,
}

impl Assigned {
    fn single(weight: u8) -> Self {
        Self {
            weight,
            deny_weight: None,
        }
    }

    fn pair(deny: u8, allow: u8) -> Result<Self> {
        if deny >= allow {
            return Err(HFenceError::InvalidPolicy(format!(
                "dns allow weight ({allow}) must be greater than deny weight ({deny})"
            )));
        }
        Ok(Self {
            weight: allow,
            deny_weight: Some(deny),
        })
    }
}

/// Assign a weight to every directive, in program order.
pub fn assign(program: &[Directive]) -> Result<Vec<Assigned>> {
    // u16 so that "one past 255" is representable
    let mut cursor: u16 = 0;
    let mut out = Vec::with_capacity(program.len());

    for (idx, d) in program.iter().enumerate() {
        let is_dns = matches!(d.kind, DirectiveKind::DomainNameSystem { .. });

        let assigned = match (d.weight, is_dns) {
            (WeightHint::Implicit, false) => Assigned::single(slot(cursor, idx)?),
            (WeightHint::Implicit, true) => {
                Assigned::pair(slot(cursor, idx)?, slot(cursor + 1, idx)?)?
            }
            (WeightHint::Fixed(w), false) => Assigned::single(w),
            (WeightHint::Fixed(0), true) => {
                return Err(HFenceError::InvalidPolicy(format!(
                    "directive #{idx}: dns weight 0 leaves no room for the deny filters"
                )));
            }
            (WeightHint::Fixed(w), true) => Assigned::pair(w - 1, w)?,
            (WeightHint::Pair { deny, allow }, true) => Assigned::pair(deny, allow)?,
            (WeightHint::Pair { .. }, false) => {
                return Err(HFenceError::InvalidPolicy(format!(
                    "directive #{idx}: weight pair only applies to dns, got {}",
                    d.kind.name()
                )));
            }
        };

        cursor = cursor.max(u16::from(assigned.weight) + 1);
        out.push(assigned);
    }

    Ok(out)
}

fn slot(cursor: u16, idx: usize) -> Result<u8> {
    u8::try_from(cursor).map_err(|_| {
        HFenceError::InvalidPolicy(format!(
            "directive #{idx}: weight space exhausted (max 255)"
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use hfence_core::directive::{Action, Context};
    use hfence_core::ErrorCode;

    fn directive(kind: DirectiveKind, weight: WeightHint) -> Directive {
        let action = match kind {
            DirectiveKind::AllTraffic => Action::Block,
            _ => Action::Allow,
        };
        let ctx = Context::default().with_action(action).with_weight(weight);
        Directive::new("test", ctx, kind).unwrap()
    }

    fn dns() -> DirectiveKind {
        DirectiveKind::DomainNameSystem { resolvers: vec![] }
    }

    #[test]
    fn implicit_order_is_strictly_increasing() {
        let program = vec![
            directive(DirectiveKind::AllTraffic, WeightHint::Implicit),
            directive(DirectiveKind::Loopback, WeightHint::Implicit),
            directive(DirectiveKind::LocalAreaNetwork, WeightHint::Implicit),
            directive(dns(), WeightHint::Implicit),
            directive(DirectiveKind::IkeV2, WeightHint::Implicit),
        ];
        let w = assign(&program).unwrap();
        assert_eq!(w[0], Assigned::single(0));
        assert_eq!(w[1], Assigned::single(1));
        assert_eq!(w[2], Assigned::single(2));
        assert_eq!(w[3].deny_weight, Some(3));
        assert_eq!(w[3].weight, 4);
        assert_eq!(w[4], Assigned::single(5));
    }

    #[test]
    fn implicit_after_explicit_moves_past_it() {
        let program = vec![
            directive(DirectiveKind::Loopback, WeightHint::Fixed(10)),
            directive(DirectiveKind::IkeV2, WeightHint::Implicit),
        ];
        let w = assign(&program).unwrap();
        assert_eq!(w[0].weight, 10);
        assert_eq!(w[1].weight, 11);
    }

    #[test]
    fn explicit_lower_weight_after_implicit_is_kept() {
        let program = vec![
            directive(DirectiveKind::Loopback, WeightHint::Implicit),
            directive(DirectiveKind::Loopback, WeightHint::Implicit),
            directive(DirectiveKind::AllTraffic, WeightHint::Fixed(0)),
        ];
        let w = assign(&program).unwrap();
        assert_eq!(w[2].weight, 0);
    }

    #[test]
    fn dns_fixed_weight_splits_below() {
        let w = assign(&[directive(dns(), WeightHint::Fixed(11))]).unwrap();
        assert_eq!(w[0].deny_weight, Some(10));
        assert_eq!(w[0].weight, 11);
    }

    #[test]
    fn dns_pair_must_be_ordered() {
        let err = assign(&[directive(dns(), WeightHint::Pair { deny: 11, allow: 10 })])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);

        let err = assign(&[directive(dns(), WeightHint::Pair { deny: 4, allow: 4 })])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);
    }

    #[test]
    fn dns_fixed_zero_is_invalid() {
        let err = assign(&[directive(dns(), WeightHint::Fixed(0))]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);
    }

    #[test]
    fn pair_on_non_dns_is_invalid() {
        let err = assign(&[directive(
            DirectiveKind::Loopback,
            WeightHint::Pair { deny: 1, allow: 2 },
        )])
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);
    }

    #[test]
    fn weight_space_is_bounded() {
        let mut program = vec![directive(DirectiveKind::Loopback, WeightHint::Fixed(255))];
        program.push(directive(DirectiveKind::Loopback, WeightHint::Implicit));
        let err = assign(&program).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);

        let many: Vec<_> = (0..256)
            .map(|_| directive(DirectiveKind::Loopback, WeightHint::Implicit))
            .collect();
        assert_eq!(assign(&many).unwrap()[255].weight, 255);
    }
}
