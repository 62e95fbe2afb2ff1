pub mod article;
pub mod article_tag;
pub mod category;
pub mod tag;

pub mod prelude {
    pub use super::article::Entity as Article;
    pub use super::article_tag::Entity as ArticleTag;
    pub use super::category::Entity as Category;
    pub use super::tag::Entity as Tag;
}
