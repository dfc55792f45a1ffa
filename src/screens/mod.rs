pub mod practice;

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenAction {
    None,
    Navigate(Screen),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    SelectMusic,
    Practice,
}
