pub mod handle;
pub mod multiview;
pub mod view;

pub use handle::MultiViewHandle;
pub use multiview::{ConfirmRule, MultiView};
pub use view::View;
