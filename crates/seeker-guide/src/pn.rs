use nalgebra::Vector2;

/// Squared line-of-sight length below which no command is issued.
pub const LOS_EPSILON_SQ: f64 = 1e-12;

/// Pure proportional navigation lateral acceleration command:
/// `N * ((v_t - v_i) x los) / |los|^2`, applied perpendicular to the
/// interceptor velocity.
pub fn pure_pn_command(
    line_of_sight: Vector2<f64>,
    target_velocity: Vector2<f64>,
    interceptor_velocity: Vector2<f64>,
    navigation_ratio: f64,
) -> Vector2<f64> {
    let los_sq = line_of_sight.norm_squared();
    if los_sq < LOS_EPSILON_SQ {
        return Vector2::zeros();
    }
    let closing = target_velocity - interceptor_velocity;
    let los_rate = closing.perp(&line_of_sight) / los_sq;
    let normal = Vector2::new(-interceptor_velocity.y, interceptor_velocity.x);
    normal * (navigation_ratio * los_rate)
}
